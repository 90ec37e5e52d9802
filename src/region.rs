//! Range parsing and read planning.
//!
//! Client sub-range requests arrive either as `start`/`end` query
//! parameters (end exclusive, wrap-around legal) or as a single-range HTTP
//! Range header (end inclusive, wrap-around refused with 416). Both are
//! normalized into a [`Window`], which the planner turns into one or two
//! contiguous [`Region`]s over the uncompressed byte stream of a container
//! file.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("Invalid 'Range' header")]
    InvalidRange,
    #[error("Invalid unit for 'Range' header. Only 'bytes' ranges are supported.")]
    UnsupportedUnit,
    #[error("Range request and start/end parameters are mutually exclusive")]
    MutuallyExclusive,
    /// Wrap-around requested through a Range header. The refget spec keeps
    /// 416 for this one case and forces 400 for the other boundary errors.
    #[error("Range request has start > end. Circular requests not supported as a range header")]
    CircularRange,
    /// Should be 422, but the refget spec forces 400.
    #[error("Requested start is beyond end of sequence")]
    StartBeyondSequence,
}

/// One contiguous read interval, absolute offset into the uncompressed
/// byte stream of a container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: u64,
    pub length: u64,
}

/// The requested window in sequence coordinates, start inclusive, end
/// exclusive. `end == None` runs to the end of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: u64,
    pub end: Option<u64>,
}

impl Window {
    /// An explicitly empty window (`end == start`, end nonzero) returns an
    /// empty 200 before any store lookup happens.
    pub fn is_empty(&self) -> bool {
        matches!(self.end, Some(end) if end > 0 && end == self.start)
    }
}

/// Parse a Range header. Only the single-range forms `bytes=N-` and
/// `bytes=N-M` are accepted; multiple ranges and the suffix form are not.
/// The returned end is byte-inclusive, as sent on the wire.
pub fn parse_range(raw: &str) -> Result<(u64, Option<u64>), RegionError> {
    let (unit, ranges) = raw.split_once('=').ok_or(RegionError::InvalidRange)?;
    if unit != "bytes" {
        return Err(RegionError::UnsupportedUnit);
    }
    let (start, end) = ranges.split_once('-').ok_or(RegionError::InvalidRange)?;
    if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RegionError::InvalidRange);
    }
    let start = start.parse().map_err(|_| RegionError::InvalidRange)?;
    if end.is_empty() {
        return Ok((start, None));
    }
    if !end.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RegionError::InvalidRange);
    }
    let end = end.parse().map_err(|_| RegionError::InvalidRange)?;
    Ok((start, Some(end)))
}

/// Merge query parameters and the Range header into one window.
///
/// The two input forms are mutually exclusive. A Range end is inclusive on
/// the wire and exclusive here, so it gets one added. A Range implying
/// wrap-around is refused; parameters express wrap-around as `start > end`
/// and pass through for the planner to split.
pub fn request_window(
    start: Option<u64>,
    end: Option<u64>,
    range_header: Option<&str>,
) -> Result<Window, RegionError> {
    let Some(raw) = range_header else {
        return Ok(Window {
            start: start.unwrap_or(0),
            end,
        });
    };
    if start.is_some() || end.is_some() {
        return Err(RegionError::MutuallyExclusive);
    }
    let (start, end) = parse_range(raw)?;
    let end = match end {
        Some(e) => Some(e.checked_add(1).ok_or(RegionError::InvalidRange)?),
        None => None,
    };
    if let Some(end) = end {
        if start > end {
            return Err(RegionError::CircularRange);
        }
    }
    Ok(Window { start, end })
}

/// Plan the read intervals for a window over one record.
///
/// Linear windows produce a single region clamped to the sequence end.
/// A wrap-around window (`start > end`) splits into a read to the end of
/// the sequence followed by one from the origin; an end of 0 makes the
/// second read a no-op and it is dropped.
pub fn plan(window: Window, seq_start: u64, seq_length: u64) -> Result<Vec<Region>, RegionError> {
    let start = window.start;
    if start >= seq_length {
        return Err(RegionError::StartBeyondSequence);
    }
    let end = window.end.unwrap_or(seq_length);

    if start > end {
        let mut regions = vec![Region {
            offset: seq_start + start,
            length: seq_length - start,
        }];
        if end > 0 {
            regions.push(Region {
                offset: seq_start,
                length: end,
            });
        }
        return Ok(regions);
    }

    let length = (seq_length - start).min(end - start);
    Ok(vec![Region {
        offset: seq_start + start,
        length,
    }])
}

/// Sum of the planned read lengths. Zero means an empty response body.
pub fn total_length(regions: &[Region]) -> u64 {
    regions.iter().map(|r| r.length).sum()
}
