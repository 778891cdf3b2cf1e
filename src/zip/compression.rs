//! Chunked deflate/inflate pipeline.
//!
//! Both directions pull input from a `provider(position, buf)` callback that
//! fills `buf` and returns the number of bytes written into it, and push output
//! to a `consumer(bytes)` callback. The CRC-32 is always accumulated over the
//! plaintext side.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{ArchiveError, Result};

/// Default chunk size for reads and writes.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Upper bound for the compression engine's internal buffers.
pub const MAX_COMPRESSION_BUFFER_SIZE: usize = 64 * 1024;

/// Continue a CRC-32 computation from `checksum` over `bytes`.
pub fn crc32(checksum: u32, bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(checksum);
    hasher.update(bytes);
    hasher.finalize()
}

fn buffer_len(total_size: u64, buffer_size: usize) -> usize {
    let requested = buffer_size.clamp(1, MAX_COMPRESSION_BUFFER_SIZE);
    // Small payloads do not need a full-sized buffer, but keep room for the
    // deflate trailer.
    usize::try_from(total_size)
        .map(|total| requested.min(total.max(64)))
        .unwrap_or(requested)
}

/// Deflate `total_size` bytes pulled from `provider`, pushing the raw deflate
/// stream to `consumer`. Returns the CRC-32 of the source bytes.
///
/// The stream is finalized on the last chunk: when `provider` returns fewer
/// bytes than requested, or once `total_size` bytes were consumed.
pub fn compress<P, C>(total_size: u64, buffer_size: usize, mut provider: P, mut consumer: C) -> Result<u32>
where
    P: FnMut(u64, &mut [u8]) -> Result<usize>,
    C: FnMut(&[u8]) -> Result<()>,
{
    let len = buffer_len(total_size, buffer_size);
    let mut engine = Compress::new(Compression::default(), false);
    let mut input = vec![0u8; len];
    let mut output = vec![0u8; len];
    let mut filled = 0;
    let mut position = 0u64;
    let mut checksum = 0;

    loop {
        let wanted = (total_size - position).min(len as u64) as usize;
        let read = if wanted > 0 {
            provider(position, &mut input[..wanted])?
        } else {
            0
        };
        let read = read.min(wanted);
        checksum = crc32(checksum, &input[..read]);
        position += read as u64;

        let last = read < wanted || position >= total_size;
        let flush = if last {
            FlushCompress::Finish
        } else {
            FlushCompress::None
        };

        let mut consumed = 0;
        loop {
            let before_in = engine.total_in();
            let before_out = engine.total_out();
            let status = engine
                .compress(&input[consumed..read], &mut output[filled..], flush)
                .map_err(|e| ArchiveError::CorruptedData(e.to_string()))?;
            let used = (engine.total_in() - before_in) as usize;
            let produced = (engine.total_out() - before_out) as usize;
            consumed += used;
            filled += produced;

            if filled == output.len() {
                consumer(&output)?;
                filled = 0;
            }

            match status {
                Status::StreamEnd => {
                    if filled > 0 {
                        consumer(&output[..filled])?;
                    }
                    tracing::trace!(position, "deflate stream finished");
                    return Ok(checksum);
                }
                Status::Ok | Status::BufError if !last && consumed == read => break,
                Status::BufError if used == 0 && produced == 0 => {
                    return Err(ArchiveError::CorruptedData("deflate stream stalled".into()));
                }
                _ => {}
            }
        }
    }
}

/// Inflate a raw deflate stream of `total_size` compressed bytes pulled from
/// `provider`, pushing plaintext to `consumer`. Returns the CRC-32 of the
/// produced bytes, or 0 when `skip_checksum` is set.
pub fn decompress<P, C>(
    total_size: u64,
    buffer_size: usize,
    skip_checksum: bool,
    mut provider: P,
    mut consumer: C,
) -> Result<u32>
where
    P: FnMut(u64, &mut [u8]) -> Result<usize>,
    C: FnMut(&[u8]) -> Result<()>,
{
    let len = buffer_size.clamp(1, MAX_COMPRESSION_BUFFER_SIZE);
    let mut engine = Decompress::new(false);
    let mut input = vec![0u8; buffer_len(total_size, buffer_size)];
    let mut output = vec![0u8; len];
    let mut position = 0u64;
    let mut checksum = 0;

    loop {
        let wanted = (total_size - position).min(input.len() as u64) as usize;
        let read = if wanted > 0 {
            provider(position, &mut input[..wanted])?
        } else {
            0
        };
        let read = read.min(wanted);
        position += read as u64;

        let last = read < wanted || position >= total_size;

        // Raw deflate signals its own end, so the engine is never asked to
        // finish. A final block that never arrives is reported below.
        let mut consumed = 0;
        loop {
            let before_in = engine.total_in();
            let before_out = engine.total_out();
            let status = engine
                .decompress(&input[consumed..read], &mut output, FlushDecompress::None)
                .map_err(|e| ArchiveError::CorruptedData(e.to_string()))?;
            let used = (engine.total_in() - before_in) as usize;
            let produced = (engine.total_out() - before_out) as usize;
            consumed += used;

            if produced > 0 {
                if !skip_checksum {
                    checksum = crc32(checksum, &output[..produced]);
                }
                consumer(&output[..produced])?;
            }

            if status == Status::StreamEnd {
                tracing::trace!(position, "inflate stream finished");
                return Ok(checksum);
            }
            if consumed == read && produced < output.len() {
                break;
            }
            if used == 0 && produced == 0 {
                return Err(ArchiveError::CorruptedData("inflate stream stalled".into()));
            }
        }

        if last {
            return Err(ArchiveError::CorruptedData(
                "unexpected end of deflate stream".into(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_provider(data: &[u8]) -> impl FnMut(u64, &mut [u8]) -> Result<usize> + '_ {
        move |position, buf| {
            let start = position as usize;
            let end = (start + buf.len()).min(data.len());
            buf[..end - start].copy_from_slice(&data[start..end]);
            Ok(end - start)
        }
    }

    fn sample_payload() -> Vec<u8> {
        (0..100_000u32)
            .flat_map(|i| format!("line {} of the sample payload\n", i % 977).into_bytes())
            .collect()
    }

    #[test]
    fn crc32_matches_reference_value() {
        assert_eq!(crc32(0, b"123456789"), 0xCBF4_3926);
        let split = crc32(crc32(0, b"1234"), b"56789");
        assert_eq!(split, 0xCBF4_3926);
    }

    #[test]
    fn compress_then_decompress() {
        let payload = sample_payload();
        let mut compressed = Vec::new();
        let checksum = compress(
            payload.len() as u64,
            DEFAULT_BUFFER_SIZE,
            slice_provider(&payload),
            |chunk| {
                compressed.extend_from_slice(chunk);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(checksum, crc32fast::hash(&payload));
        assert!(compressed.len() < payload.len());

        let mut restored = Vec::new();
        let mut largest_chunk = 0;
        let checksum = decompress(
            compressed.len() as u64,
            DEFAULT_BUFFER_SIZE,
            false,
            slice_provider(&compressed),
            |chunk| {
                largest_chunk = largest_chunk.max(chunk.len());
                restored.extend_from_slice(chunk);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(restored, payload);
        assert_eq!(checksum, crc32fast::hash(&payload));
        assert!(largest_chunk <= DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn flate2_can_read_our_stream() {
        use std::io::Read;

        let payload = sample_payload();
        let mut compressed = Vec::new();
        compress(payload.len() as u64, 4096, slice_provider(&payload), |chunk| {
            compressed.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();

        let mut restored = Vec::new();
        flate2::read::DeflateDecoder::new(compressed.as_slice())
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn short_provider_finalizes_stream() {
        let payload = b"hello hello hello".to_vec();
        let mut compressed = Vec::new();
        // Announce more than the provider will deliver.
        let checksum = compress(1_000, 8, slice_provider(&payload), |chunk| {
            compressed.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(checksum, crc32fast::hash(&payload));

        let mut restored = Vec::new();
        decompress(compressed.len() as u64, 8, false, slice_provider(&compressed), |chunk| {
            restored.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn empty_payload() {
        let mut compressed = Vec::new();
        let checksum = compress(0, DEFAULT_BUFFER_SIZE, slice_provider(&[]), |chunk| {
            compressed.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(checksum, 0);
        assert!(!compressed.is_empty());

        let mut restored = Vec::new();
        decompress(compressed.len() as u64, 16, false, slice_provider(&compressed), |chunk| {
            restored.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn skip_checksum_returns_zero() {
        let payload = sample_payload();
        let mut compressed = Vec::new();
        compress(payload.len() as u64, 1024, slice_provider(&payload), |chunk| {
            compressed.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();

        let checksum =
            decompress(compressed.len() as u64, 1024, true, slice_provider(&compressed), |_| Ok(()))
                .unwrap();
        assert_eq!(checksum, 0);
    }

    #[test]
    fn corrupt_stream_is_not_an_io_error() {
        let garbage = vec![0xFFu8; 64];
        let err = decompress(64, 16, false, slice_provider(&garbage), |_| Ok(())).unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptedData(_)));
    }

    #[test]
    fn truncated_stream_is_reported() {
        let payload = sample_payload();
        let mut compressed = Vec::new();
        compress(payload.len() as u64, 1024, slice_provider(&payload), |chunk| {
            compressed.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        compressed.truncate(compressed.len() / 2);

        let err = decompress(compressed.len() as u64, 1024, false, slice_provider(&compressed), |_| {
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, ArchiveError::CorruptedData(_)));
    }

    #[test]
    fn consumer_error_aborts() {
        let payload = sample_payload();
        let err = compress(payload.len() as u64, 1024, slice_provider(&payload), |_| {
            Err(ArchiveError::Cancelled)
        })
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
