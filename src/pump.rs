//! The loop that moves data from a source, through a codec, to a sink.
//!
//! Memory use is two fixed-size chunks no matter how big the input is.

use std::io::{self, Read, Write};

use log::*;

use crate::codec::*;
use crate::result::*;

/// How much we read from the source at a time
pub const INPUT_CHUNK: usize = 4096;
/// How much output we collect before writing it to the sink
pub const OUTPUT_CHUNK: usize = 4096;

/// Reads into `buf`, retrying if interrupted.
fn read_chunk<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Pumps all of `source` through `codec` into `sink`.
///
/// When decompressing, a member that ends with input still left over
/// is followed by another: the codec is reset and we keep going,
/// so concatenated members decode to the concatenation of their contents.
///
/// Whatever was written to `sink` before an error stays written.
/// Cleaning that up is the caller's job.
pub fn pump<C, R, W>(codec: &mut C, source: &mut R, sink: &mut W) -> GzResult<()>
where
    C: Codec + ?Sized,
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut input = [0u8; INPUT_CHUNK];
    let mut output = [0u8; OUTPUT_CHUNK];
    let mut members = 1;

    loop {
        let read = read_chunk(source, &mut input)?;
        let flush = if read == 0 { Flush::Finish } else { Flush::None };
        trace!("Read {} bytes ({:?})", read, flush);

        let mut pos = 0;
        let ended = loop {
            let progress = codec.transform(&input[pos..read], &mut output, flush)?;
            pos += progress.consumed;
            sink.write_all(&output[..progress.produced])?;

            match progress.status {
                Status::StreamEnd if pos < read => {
                    members += 1;
                    debug!("Member ended with input left; starting member {}", members);
                    codec.reset();
                }
                Status::StreamEnd => break true,
                Status::NeedMoreInput => break false,
                Status::Ok if progress.consumed == 0 && progress.produced == 0 => break false,
                Status::Ok => {}
            }
        };

        if flush == Flush::Finish {
            if !ended {
                return Err(GzError::CorruptStream(String::from(
                    "unexpected end of file",
                )));
            }
            sink.flush()?;
            return Ok(());
        }
    }
}
