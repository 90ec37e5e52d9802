//! Chunked streaming of planned regions.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use crate::region::Region;
use crate::zseek::SeekableZstd;

/// Maximum number of (uncompressed) bytes to read per loop iteration. Also
/// the minimum response size for a fronting proxy to start compressing.
pub const CHUNKSIZE: usize = 128 * 1024;

/// Emitted in-band when a read fails. By then a 200 and the content type
/// are already on the wire; this marker is the only signal the client can
/// still get.
pub const TRUNCATION_MARKER: &[u8] = b"\n\nIO error. Sequence truncated.\n";

/// Stream `regions` from `handle` as HTTP/1.1 chunked transfer encoding,
/// one transfer chunk per read. A failed or short read emits the
/// truncation marker and ends that region; remaining regions are still
/// attempted. Write errors (client gone) propagate to the caller, which
/// drops the connection and releases the handle by dropping the Arc.
pub async fn stream_regions<W>(
    handle: Arc<SeekableZstd>,
    regions: &[Region],
    writer: &mut W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for region in regions {
        debug!(
            "stream: file={} start={} length={}",
            handle.path().display(),
            region.offset,
            region.length
        );
        let mut chunkstart = 0u64;
        while chunkstart < region.length {
            let readlen = CHUNKSIZE.min((region.length - chunkstart) as usize);
            let offset = region.offset + chunkstart;
            let h = handle.clone();
            let read = tokio::task::spawn_blocking(move || {
                let mut buf = vec![0u8; readlen];
                let n = h.read_at(offset, &mut buf)?;
                buf.truncate(n);
                Ok::<_, std::io::Error>(buf)
            })
            .await;

            let data = match read {
                Ok(Ok(data)) if data.len() == readlen => data,
                Ok(Ok(_)) => {
                    error!(
                        "Short read for: file={} start={} length={}. \
                         Client may have received partial data",
                        handle.path().display(),
                        region.offset,
                        region.length
                    );
                    write_chunk(writer, TRUNCATION_MARKER).await?;
                    break;
                }
                Ok(Err(err)) => {
                    error!(
                        "Error reading sequence data: file={} start={} length={}: {err}. \
                         Client may have received partial data",
                        handle.path().display(),
                        region.offset,
                        region.length
                    );
                    write_chunk(writer, TRUNCATION_MARKER).await?;
                    break;
                }
                Err(err) => {
                    error!("Read task failed: {err}");
                    write_chunk(writer, TRUNCATION_MARKER).await?;
                    break;
                }
            };

            write_chunk(writer, &data).await?;
            chunkstart += readlen as u64;
        }
    }
    writer.write_all(b"0\r\n\r\n").await?;
    writer.flush().await
}

/// Write one HTTP/1.1 transfer chunk. Empty input is skipped: a zero-size
/// chunk would terminate the encoding.
pub async fn write_chunk<W>(writer: &mut W, data: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if data.is_empty() {
        return Ok(());
    }
    writer
        .write_all(format!("{:X}\r\n", data.len()).as_bytes())
        .await?;
    writer.write_all(data).await?;
    writer.write_all(b"\r\n").await
}
