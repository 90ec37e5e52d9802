//! Seekable zstd container files.
//!
//! # On-disk layout
//!
//! ```text
//! frame 0 .. frame N-1     independent zstd frames
//! skippable frame          seek table:
//!    0   4  magic          = 0x184D2A5E (LE u32)
//!    4   4  content size   = N*entry + 9 (LE u32)
//!    8  N*entry            per frame: compressed size u32,
//!                          decompressed size u32, [checksum u32]
//!    ..  9  footer         frame count u32, descriptor u8
//!                          (bit 7 = checksum flag), magic 0x8F92EAB1
//! ```
//!
//! The seek table translates an uncompressed offset to a frame in constant
//! time; a read decompresses only the frames it touches. All numeric
//! fields are little-endian.
//!
//! A handle may be shared between requests. The decoder position and the
//! one-frame decode cache live behind a mutex taken for a single
//! seek+read pair, so interleaved readers cannot corrupt each other.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

pub const SEEKABLE_MAGIC: u32 = 0x8F92_EAB1;
pub const SKIPPABLE_MAGIC: u32 = 0x184D_2A5E;
const FOOTER_SIZE: u64 = 9;

#[derive(Debug, Error)]
pub enum ZseekError {
    #[error("not a seekable zstd file (bad magic)")]
    BadMagic,
    #[error("corrupt seek table")]
    CorruptSeekTable,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy)]
struct FrameEntry {
    comp_offset: u64,
    comp_size: u32,
    decomp_offset: u64,
    decomp_size: u32,
}

struct Inner {
    // None once the handle has been closed; the descriptor is released
    // exactly once.
    file: Option<File>,
    // Last decompressed frame. Chunked reads walk forward through the same
    // frame repeatedly, so one slot is enough.
    cached: Option<(usize, Vec<u8>)>,
}

/// One open container file with random access in uncompressed coordinates.
pub struct SeekableZstd {
    path: PathBuf,
    frames: Vec<FrameEntry>,
    uncompressed_len: u64,
    inner: Mutex<Inner>,
}

impl SeekableZstd {
    /// Open a container and parse its seek table.
    pub fn open(path: &Path) -> Result<Self, ZseekError> {
        let mut file = File::open(path)?;
        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < FOOTER_SIZE + 8 {
            return Err(ZseekError::BadMagic);
        }

        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.seek(SeekFrom::Start(file_len - FOOTER_SIZE))?;
        file.read_exact(&mut footer)?;
        let num_frames = u64::from(u32::from_le_bytes(footer[0..4].try_into().unwrap()));
        let descriptor = footer[4];
        if u32::from_le_bytes(footer[5..9].try_into().unwrap()) != SEEKABLE_MAGIC {
            return Err(ZseekError::BadMagic);
        }
        let entry_size: u64 = if descriptor & 0x80 != 0 { 12 } else { 8 };

        let table_size = num_frames * entry_size + FOOTER_SIZE;
        let frame_size = table_size + 8;
        if frame_size > file_len {
            return Err(ZseekError::CorruptSeekTable);
        }
        let table_start = file_len - frame_size;

        let mut header = [0u8; 8];
        file.seek(SeekFrom::Start(table_start))?;
        file.read_exact(&mut header)?;
        if u32::from_le_bytes(header[0..4].try_into().unwrap()) != SKIPPABLE_MAGIC
            || u64::from(u32::from_le_bytes(header[4..8].try_into().unwrap())) != table_size
        {
            return Err(ZseekError::CorruptSeekTable);
        }

        let mut entries = vec![0u8; (num_frames * entry_size) as usize];
        file.read_exact(&mut entries)?;

        let mut frames = Vec::with_capacity(num_frames as usize);
        let (mut comp_offset, mut decomp_offset) = (0u64, 0u64);
        for chunk in entries.chunks_exact(entry_size as usize) {
            let comp_size = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let decomp_size = u32::from_le_bytes(chunk[4..8].try_into().unwrap());
            frames.push(FrameEntry {
                comp_offset,
                comp_size,
                decomp_offset,
                decomp_size,
            });
            comp_offset += u64::from(comp_size);
            decomp_offset += u64::from(decomp_size);
        }
        // The frames must fit in front of the seek table.
        if comp_offset > table_start {
            return Err(ZseekError::CorruptSeekTable);
        }

        Ok(SeekableZstd {
            path: path.to_owned(),
            frames,
            uncompressed_len: decomp_offset,
            inner: Mutex::new(Inner {
                file: Some(file),
                cached: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total uncompressed payload size.
    pub fn uncompressed_len(&self) -> u64 {
        self.uncompressed_len
    }

    /// Read at an uncompressed offset. Returns the number of bytes read;
    /// fewer than `buf.len()` only at end of data. Fails once the handle
    /// has been closed.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        let mut done = 0usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            if pos >= self.uncompressed_len {
                break;
            }
            let idx = self.frame_for(pos);
            let frame = self.frames[idx];
            if inner.cached.as_ref().map(|(i, _)| *i) != Some(idx) {
                self.load_frame(&mut inner, idx)?;
            }
            let data = match &inner.cached {
                Some((_, data)) => data,
                None => return Err(closed_handle()),
            };
            let in_frame = (pos - frame.decomp_offset) as usize;
            let n = (buf.len() - done).min(data.len() - in_frame);
            buf[done..done + n].copy_from_slice(&data[in_frame..in_frame + n]);
            done += n;
        }
        Ok(done)
    }

    /// Close the underlying descriptor. Idempotent; later reads fail, which
    /// in-flight streams surface as truncation.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.file = None;
        inner.cached = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().file.is_none()
    }

    // Index of the frame containing uncompressed position `pos`.
    // Callers guarantee pos < uncompressed_len, so a frame always exists.
    fn frame_for(&self, pos: u64) -> usize {
        match self
            .frames
            .binary_search_by(|f| f.decomp_offset.cmp(&pos))
        {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }

    fn load_frame(&self, inner: &mut Inner, idx: usize) -> io::Result<()> {
        let frame = self.frames[idx];
        let file = inner.file.as_mut().ok_or_else(closed_handle)?;
        file.seek(SeekFrom::Start(frame.comp_offset))?;
        let mut comp = vec![0u8; frame.comp_size as usize];
        file.read_exact(&mut comp)?;
        let data = zstd::bulk::decompress(&comp, frame.decomp_size as usize)?;
        if data.len() != frame.decomp_size as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame decompressed to an unexpected size",
            ));
        }
        inner.cached = Some((idx, data));
        Ok(())
    }
}

fn closed_handle() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "file handle closed")
}
