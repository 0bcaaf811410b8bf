//! Streaming transforms between raw bytes and gzip members.
//!
//! The bit-level DEFLATE work is flate2's. What lives here is everything
//! around it: the member header, the CRC-32 and length trailer,
//! and where one member ends and the next begins.
//!
//! Both directions present the same [`Codec`] interface to the
//! [pump](../pump/index.html): hand it whatever input you have and room
//! for output, and it reports how much of each it used.

use std::io;

use crc32fast::Hasher;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use log::*;

use crate::header::{HeaderDecoder, MemberHeader};
use crate::result::*;

/// Tells a codec whether more input will follow
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flush {
    /// More input is coming.
    None,
    /// This is the last of the input.
    Finish,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Progress was made; call again to make more.
    Ok,
    /// The current member is complete.
    StreamEnd,
    /// Everything that can be produced from the input so far has been.
    NeedMoreInput,
}

/// The outcome of a [`Codec::transform()`] call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Bytes taken from the front of the input
    pub consumed: usize,
    /// Bytes written to the front of the output
    pub produced: usize,
    pub status: Status,
}

/// A streaming transform from one byte stream to another.
pub trait Codec {
    /// Consumes some prefix of `input` and fills some prefix of `output`.
    ///
    /// Errors in the data come back as [`GzError::CorruptStream`]
    /// (or a header error while one is being decoded).
    fn transform(&mut self, input: &[u8], output: &mut [u8], flush: Flush)
        -> GzResult<Progress>;

    /// Starts a fresh member after the last one hit [`Status::StreamEnd`].
    fn reset(&mut self);
}

/// Which way a [`CodecSession`] transforms data
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

/// One codec, used for exactly one source file (or stdin) and then dropped.
#[derive(Debug)]
pub enum CodecSession {
    Compress(GzipEncoder),
    Decompress(GzipDecoder),
}

impl CodecSession {
    pub fn compress(level: u32, header: MemberHeader) -> Self {
        CodecSession::Compress(GzipEncoder::new(level, header))
    }

    pub fn decompress() -> Self {
        CodecSession::Decompress(GzipDecoder::new())
    }

    pub fn direction(&self) -> Direction {
        match self {
            CodecSession::Compress(_) => Direction::Compress,
            CodecSession::Decompress(_) => Direction::Decompress,
        }
    }

    /// Returns the decoder, if this is a decompression session.
    pub fn decoder(&mut self) -> Option<&mut GzipDecoder> {
        match self {
            CodecSession::Decompress(d) => Some(d),
            CodecSession::Compress(_) => None,
        }
    }
}

impl Codec for CodecSession {
    fn transform(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Progress> {
        match self {
            CodecSession::Compress(e) => e.transform(input, output, flush),
            CodecSession::Decompress(d) => d.transform(input, output, flush),
        }
    }

    fn reset(&mut self) {
        match self {
            CodecSession::Compress(e) => e.reset(),
            CodecSession::Decompress(d) => d.reset(),
        }
    }
}

/// Builds the 8-byte member trailer: CRC-32 then ISIZE, both little-endian.
fn trailer(crc: u32, size: u32) -> [u8; 8] {
    let mut t = [0; 8];
    t[..4].copy_from_slice(&crc.to_le_bytes());
    t[4..].copy_from_slice(&size.to_le_bytes());
    t
}

fn codec_error<E: std::fmt::Display>(e: E) -> GzError {
    GzError::CorruptStream(e.to_string())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EncodeState {
    Header,
    Payload,
    Trailer,
    Done,
}

/// Compresses its input into a single gzip member.
pub struct GzipEncoder {
    level: u32,
    header: Vec<u8>,
    deflate: Compress,
    state: EncodeState,
    /// Header or trailer bytes waiting for room in the output
    pending: Vec<u8>,
    pending_pos: usize,
    crc: Hasher,
    size: u32,
}

impl std::fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipEncoder")
            .field("level", &self.level)
            .field("state", &self.state)
            .field("size", &self.size)
            .finish()
    }
}

impl GzipEncoder {
    pub fn new(level: u32, header: MemberHeader) -> Self {
        let header = header.encode(level);
        Self {
            level,
            deflate: Compress::new(Compression::new(level), false),
            state: EncodeState::Header,
            pending: header.clone(),
            pending_pos: 0,
            header,
            crc: Hasher::new(),
            size: 0,
        }
    }

    /// Copies as many pending bytes as fit. Returns true once they're all out.
    fn drain_pending(&mut self, output: &mut [u8], produced: &mut usize) -> bool {
        let n = (self.pending.len() - self.pending_pos).min(output.len() - *produced);
        output[*produced..*produced + n]
            .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
        *produced += n;
        self.pending_pos += n;
        self.pending_pos == self.pending.len()
    }
}

impl Codec for GzipEncoder {
    fn transform(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Progress> {
        let mut consumed = 0;
        let mut produced = 0;

        loop {
            if !self.drain_pending(output, &mut produced) {
                return Ok(Progress {
                    consumed,
                    produced,
                    status: Status::Ok,
                });
            }

            match self.state {
                EncodeState::Header => self.state = EncodeState::Payload,
                EncodeState::Payload => {
                    if produced == output.len() {
                        return Ok(Progress {
                            consumed,
                            produced,
                            status: Status::Ok,
                        });
                    }
                    let mode = match flush {
                        Flush::None => FlushCompress::None,
                        Flush::Finish => FlushCompress::Finish,
                    };
                    let before_in = self.deflate.total_in();
                    let before_out = self.deflate.total_out();
                    let status = self
                        .deflate
                        .compress(&input[consumed..], &mut output[produced..], mode)
                        .map_err(codec_error)?;
                    let read = (self.deflate.total_in() - before_in) as usize;
                    let wrote = (self.deflate.total_out() - before_out) as usize;

                    self.crc.update(&input[consumed..consumed + read]);
                    self.size = self.size.wrapping_add(read as u32);
                    consumed += read;
                    produced += wrote;

                    if status == flate2::Status::StreamEnd {
                        let crc = self.crc.clone().finalize();
                        trace!("Finished member: crc {:08x}, {} bytes", crc, self.size);
                        self.pending = trailer(crc, self.size).to_vec();
                        self.pending_pos = 0;
                        self.state = EncodeState::Trailer;
                    } else if read == 0 && wrote == 0 {
                        let status = match flush {
                            Flush::None => Status::NeedMoreInput,
                            Flush::Finish => Status::Ok,
                        };
                        return Ok(Progress {
                            consumed,
                            produced,
                            status,
                        });
                    }
                }
                EncodeState::Trailer => self.state = EncodeState::Done,
                EncodeState::Done => {
                    return Ok(Progress {
                        consumed,
                        produced,
                        status: Status::StreamEnd,
                    })
                }
            }
        }
    }

    fn reset(&mut self) {
        self.deflate.reset();
        self.state = EncodeState::Header;
        self.pending = self.header.clone();
        self.pending_pos = 0;
        self.crc = Hasher::new();
        self.size = 0;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DecodeState {
    Header,
    Payload,
    Trailer(usize),
    Done,
}

/// Decompresses one or more gzip members.
pub struct GzipDecoder {
    state: DecodeState,
    header: HeaderDecoder,
    /// The header of the first member
    first_header: Option<MemberHeader>,
    inflate: Decompress,
    crc: Hasher,
    size: u32,
    trailer: [u8; 8],
    /// The CRC-32 of the last completed member
    last_crc: Option<u32>,
    members: usize,
}

impl std::fmt::Debug for GzipDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipDecoder")
            .field("state", &self.state)
            .field("first_header", &self.first_header)
            .field("members", &self.members)
            .finish()
    }
}

impl Default for GzipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GzipDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            header: HeaderDecoder::new(),
            first_header: None,
            inflate: Decompress::new(false),
            crc: Hasher::new(),
            size: 0,
            trailer: [0; 8],
            last_crc: None,
            members: 0,
        }
    }

    /// The header of the first member, once it has been decoded.
    pub fn header(&self) -> Option<&MemberHeader> {
        self.first_header.as_ref()
    }

    /// The CRC-32 of the most recently completed member
    pub fn crc(&self) -> Option<u32> {
        self.last_crc
    }

    /// Reads the current member's header from `source`, one byte at a time,
    /// so that `source` is left at the first byte of compressed data.
    ///
    /// Must be called before any input is given to
    /// [`transform()`](#method.transform).
    pub fn read_header<R: io::Read>(&mut self, source: &mut R) -> GzResult<MemberHeader> {
        if self.state != DecodeState::Header {
            return Err(GzError::MalformedHeader(String::from(
                "header already decoded",
            )));
        }
        let mut byte = [0u8; 1];
        loop {
            // NeedByte
            let n = loop {
                match source.read(&mut byte) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => break other?,
                }
            };
            if n == 0 {
                if self.members == 0 && self.header.is_pristine() {
                    return Err(GzError::EmptyOrTruncatedInput);
                }
                return Err(GzError::TruncatedHeader);
            }
            // FedByte (growing the name buffer as needed), then maybe Done
            if let Some(header) = self.header.feed(byte[0])? {
                self.header_done(header.clone());
                return Ok(header);
            }
        }
    }

    fn header_done(&mut self, header: MemberHeader) {
        if self.first_header.is_none() {
            self.first_header = Some(header);
        }
        self.state = DecodeState::Payload;
    }

    /// What to report when we can't make progress with the given input.
    fn starved(&self, consumed: usize, produced: usize, flush: Flush) -> GzResult<Progress> {
        let status = match flush {
            Flush::None => Status::NeedMoreInput,
            // Let the caller take what we made, then we'll complain.
            Flush::Finish if produced > 0 => Status::Ok,
            Flush::Finish => {
                if self.members == 0
                    && self.state == DecodeState::Header
                    && self.header.is_pristine()
                {
                    return Err(GzError::EmptyOrTruncatedInput);
                }
                return Err(GzError::CorruptStream(String::from(
                    "unexpected end of file",
                )));
            }
        };
        Ok(Progress {
            consumed,
            produced,
            status,
        })
    }
}

impl Codec for GzipDecoder {
    fn transform(
        &mut self,
        input: &[u8],
        output: &mut [u8],
        flush: Flush,
    ) -> GzResult<Progress> {
        let mut consumed = 0;
        let mut produced = 0;

        loop {
            match self.state {
                DecodeState::Header => {
                    while consumed < input.len() && self.state == DecodeState::Header {
                        let byte = input[consumed];
                        consumed += 1;
                        if let Some(header) = self.header.feed(byte)? {
                            self.header_done(header);
                        }
                    }
                    if self.state == DecodeState::Header {
                        return self.starved(consumed, produced, flush);
                    }
                }
                DecodeState::Payload => {
                    if produced == output.len() {
                        return Ok(Progress {
                            consumed,
                            produced,
                            status: Status::Ok,
                        });
                    }
                    let before_in = self.inflate.total_in();
                    let before_out = self.inflate.total_out();
                    let status = self
                        .inflate
                        .decompress(
                            &input[consumed..],
                            &mut output[produced..],
                            FlushDecompress::None,
                        )
                        .map_err(codec_error)?;
                    let read = (self.inflate.total_in() - before_in) as usize;
                    let wrote = (self.inflate.total_out() - before_out) as usize;

                    self.crc.update(&output[produced..produced + wrote]);
                    self.size = self.size.wrapping_add(wrote as u32);
                    consumed += read;
                    produced += wrote;

                    if status == flate2::Status::StreamEnd {
                        self.state = DecodeState::Trailer(0);
                    } else if read == 0 && wrote == 0 {
                        return self.starved(consumed, produced, flush);
                    }
                }
                DecodeState::Trailer(mut have) => {
                    let n = (self.trailer.len() - have).min(input.len() - consumed);
                    self.trailer[have..have + n].copy_from_slice(&input[consumed..consumed + n]);
                    consumed += n;
                    have += n;
                    self.state = DecodeState::Trailer(have);
                    if have < self.trailer.len() {
                        return self.starved(consumed, produced, flush);
                    }

                    let crc = self.crc.clone().finalize();
                    if trailer(crc, self.size)[..4] != self.trailer[..4] {
                        return Err(GzError::CorruptStream(String::from(
                            "incorrect data check",
                        )));
                    }
                    if trailer(crc, self.size)[4..] != self.trailer[4..] {
                        return Err(GzError::CorruptStream(String::from(
                            "incorrect length check",
                        )));
                    }
                    trace!("Finished member: crc {:08x}, {} bytes", crc, self.size);
                    self.last_crc = Some(crc);
                    self.members += 1;
                    self.state = DecodeState::Done;
                }
                DecodeState::Done => {
                    return Ok(Progress {
                        consumed,
                        produced,
                        status: Status::StreamEnd,
                    })
                }
            }
        }
    }

    fn reset(&mut self) {
        debug!("Starting member {}", self.members + 1);
        self.state = DecodeState::Header;
        self.header = HeaderDecoder::new();
        self.inflate.reset(false);
        self.crc = Hasher::new();
        self.size = 0;
    }
}
