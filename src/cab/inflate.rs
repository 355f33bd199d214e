//! Raw deflate decoding for the two compressed-member framings.
//!
//! - Current framing: each chunk is a little-endian `u16` length followed by
//!   one complete raw deflate stream. See [`inflate_chunk`].
//! - Legacy framing: no lengths; chunks are sync-flushed deflate data ending
//!   in the empty stored block marker `00 00 FF FF`. See [`ChunkInflater`].

use flate2::{Decompress, FlushDecompress, Status};
use tracing::{trace, warn};

use crate::error::{Error, InflateFailure, Result};

use super::structures::BUFFER_SIZE;

/// Bytes ending every legacy chunk
pub const END_OF_CHUNK: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

fn data_error(e: flate2::DecompressError) -> Error {
    Error::DecompressionFailed {
        kind: InflateFailure::DataError,
        message: e.to_string(),
    }
}

/// Inflate one length-framed chunk, which must hold exactly one complete
/// raw deflate stream.
pub fn inflate_chunk(chunk: &[u8]) -> Result<Vec<u8>> {
    // A trailing pad byte keeps the decoder from starving on the final bits
    let mut input = Vec::with_capacity(chunk.len() + 1);
    input.extend_from_slice(chunk);
    input.push(0);

    let mut stream = Decompress::new(false);
    let mut output = Vec::with_capacity(BUFFER_SIZE);

    // Not Finish: a first Finish call must fit all output in one go
    loop {
        output.reserve(BUFFER_SIZE);
        let (before_in, before_out) = (stream.total_in(), stream.total_out());
        let status = stream
            .decompress_vec(&input[before_in as usize..], &mut output, FlushDecompress::None)
            .map_err(data_error)?;

        if status == Status::StreamEnd {
            trace!("Inflated chunk: {} bytes -> {} bytes", chunk.len(), output.len());
            return Ok(output);
        }
        if stream.total_in() == before_in && stream.total_out() == before_out {
            return Err(Error::DecompressionFailed {
                kind: InflateFailure::Incomplete,
                message: format!(
                    "deflate stream did not end within its {} byte chunk",
                    chunk.len()
                ),
            });
        }
    }
}

/// Length of the next legacy chunk in `buf`, not counting its end marker.
///
/// A marker followed by a byte with its low bit set cannot be a chunk
/// boundary: the next deflate block would start with a clear bit. Such
/// markers are skipped.
pub fn find_chunk_end(buf: &[u8]) -> Option<usize> {
    let mut end = find_marker(buf, 0)?;
    while end + END_OF_CHUNK.len() < buf.len() && buf[end + END_OF_CHUNK.len()] & 1 != 0 {
        warn!("End of chunk marker found inside a chunk at {}, skipping it", end);
        end = find_marker(buf, end + END_OF_CHUNK.len())?;
    }
    Some(end)
}

fn find_marker(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(END_OF_CHUNK.len())
        .position(|window| window == END_OF_CHUNK)
        .map(|position| from + position)
}

/// Decoder for marker-delimited legacy chunks.
///
/// Chunks from one run share a single inflate context, so back references
/// may reach into earlier chunks. The context is reset only if a chunk
/// ends the deflate stream.
pub struct ChunkInflater {
    stream: Decompress,
}

impl Default for ChunkInflater {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkInflater {
    pub fn new() -> Self {
        Self {
            stream: Decompress::new(false),
        }
    }

    /// Inflate one chunk (without its end marker).
    pub fn inflate(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        // Put the marker back so the decoder sees the whole sync-flush block
        let mut input = Vec::with_capacity(chunk.len() + END_OF_CHUNK.len());
        input.extend_from_slice(chunk);
        input.extend_from_slice(&END_OF_CHUNK);

        let mut output = Vec::with_capacity(BUFFER_SIZE);
        let mut offset = 0;

        loop {
            output.reserve(BUFFER_SIZE);
            let (before_in, before_out) = (self.stream.total_in(), self.stream.total_out());
            let status = self
                .stream
                .decompress_vec(&input[offset..], &mut output, FlushDecompress::Sync)
                .map_err(data_error)?;
            offset += (self.stream.total_in() - before_in) as usize;

            if status == Status::StreamEnd {
                trace!("Chunk ended the deflate stream, resetting");
                self.stream.reset(false);
                break;
            }
            // Stop once the input is used up and the decoder had room to spare
            if offset >= input.len() && output.len() < output.capacity() {
                break;
            }
            if self.stream.total_in() == before_in && self.stream.total_out() == before_out {
                return Err(Error::DecompressionFailed {
                    kind: InflateFailure::Incomplete,
                    message: format!("deflate decoder stalled {offset} bytes into a chunk"),
                });
            }
        }

        trace!("Inflated legacy chunk: {} bytes -> {} bytes", chunk.len(), output.len());
        Ok(output)
    }

    /// Split a run of legacy chunks and inflate each, passing the output of
    /// every chunk to `sink` in order. `volume` only labels errors.
    pub fn inflate_run<F>(&mut self, run: &[u8], volume: u32, mut sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut rest = run;
        while !rest.is_empty() {
            let end = find_chunk_end(rest).ok_or(Error::ChunkMarkerNotFound { volume })?;
            let output = self.inflate(&rest[..end])?;
            sink(&output)?;
            rest = &rest[end + END_OF_CHUNK.len()..];
        }
        Ok(())
    }
}
