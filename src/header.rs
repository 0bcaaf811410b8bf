//! Code specific to the gzip member header.
//!
//! Most comments quote the format definition, [RFC 1952].
//!
//! [RFC 1952]: https://www.rfc-editor.org/rfc/rfc1952

use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use log::*;

use crate::buffer::GrowableBuffer;
use crate::result::*;

/// gzip magic number
pub const MAGIC: [u8; 2] = [0x1f, 0x8b];
/// CM = 8 denotes the "deflate" compression method
pub const METHOD_DEFLATE: u8 = 8;
/// OS = 3 is Unix
pub const OS_UNIX: u8 = 3;

// FLG bits
const FTEXT: u8 = 1 << 0;
const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;
const RESERVED: u8 = 0b1110_0000;

/// Metadata from (or for) the header of one gzip member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberHeader {
    /// The original file name, without a terminating NUL.
    ///
    /// This comes from the input file and can say anything,
    /// so treat it as a bare name, never as a path to follow.
    pub name: Option<Vec<u8>>,

    /// The modification time of the original file
    pub time: Option<DateTime<Utc>>,

    /// True if the data is probably text
    pub is_text: bool,

    /// The OS the member was created on
    pub os_tag: u8,
}

impl Default for MemberHeader {
    fn default() -> Self {
        Self {
            name: None,
            time: None,
            is_text: false,
            os_tag: OS_UNIX,
        }
    }
}

impl MemberHeader {
    /// Builds the header to compress a file with.
    ///
    /// The name and time are only stored if `store_name` is set.
    pub fn for_file(
        name: Option<&[u8]>,
        time: Option<DateTime<Utc>>,
        store_name: bool,
        is_text: bool,
    ) -> Self {
        if !store_name {
            return Self {
                is_text,
                ..Self::default()
            };
        }
        Self {
            // A name with a NUL in it couldn't be read back.
            name: name.filter(|n| !n.contains(&0)).map(|n| n.to_vec()),
            time,
            is_text,
            os_tag: OS_UNIX,
        }
    }

    /// Encodes the header as it appears at the start of a member.
    pub fn encode(&self, level: u32) -> Vec<u8> {
        // +---+---+---+---+---+---+---+---+---+---+
        // |ID1|ID2|CM |FLG|     MTIME     |XFL|OS | (more-->)
        // +---+---+---+---+---+---+---+---+---+---+
        //
        // (if FLG.FNAME set)
        //
        // +=========================================+
        // |...original file name, zero-terminated...| (more-->)
        // +=========================================+
        let name_len = self.name.as_ref().map_or(0, |n| n.len() + 1);
        let mut out = Vec::with_capacity(10 + name_len);
        out.extend_from_slice(&MAGIC);
        out.push(METHOD_DEFLATE);

        let mut flags = 0;
        if self.is_text {
            flags |= FTEXT;
        }
        if self.name.is_some() {
            flags |= FNAME;
        }
        out.push(flags);

        // MTIME = 0 means no time stamp is available.
        let mtime = self
            .time
            .and_then(|t| u32::try_from(t.timestamp()).ok())
            .unwrap_or(0);
        out.extend_from_slice(&mtime.to_le_bytes());

        // XFL = 2 - compressor used maximum compression, slowest algorithm
        // XFL = 4 - compressor used fastest algorithm
        out.push(match level {
            9 => 2,
            1 => 4,
            _ => 0,
        });
        out.push(self.os_tag);

        if let Some(name) = &self.name {
            out.extend_from_slice(name);
            out.push(0);
        }
        out
    }
}

/// Where a [`HeaderDecoder`] is in the header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Magic(usize),
    Method,
    Flags,
    Time(usize),
    ExtraFlags,
    Os,
    ExtraLength(usize),
    Extra(u16),
    Name,
    Comment,
    HeaderCrc(usize),
    Done,
}

/// Decodes a member header one byte at a time.
///
/// Feeding bytes singly means we never read past the header,
/// and the (unbounded) name field only ever costs the buffer it lands in.
pub struct HeaderDecoder {
    state: State,
    flags: u8,
    /// Scratch space for multi-byte little-endian fields
    scratch: [u8; 4],
    name: GrowableBuffer,
    time: u32,
    is_text: bool,
    os_tag: u8,
    hasher: Hasher,
}

impl std::fmt::Debug for HeaderDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecoder")
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("name_len", &self.name.len())
            .finish()
    }
}

impl Default for HeaderDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Magic(0),
            flags: 0,
            scratch: [0; 4],
            name: GrowableBuffer::new(),
            time: 0,
            is_text: false,
            os_tag: 0,
            hasher: Hasher::new(),
        }
    }

    /// True if no bytes have been fed since creation.
    pub fn is_pristine(&self) -> bool {
        self.state == State::Magic(0)
    }

    /// Feeds the next header byte.
    ///
    /// Returns the header once its last byte has been fed.
    /// The decoder must not be fed after that.
    pub fn feed(&mut self, byte: u8) -> GzResult<Option<MemberHeader>> {
        if !matches!(self.state, State::HeaderCrc(_)) {
            self.hasher.update(&[byte]);
        }

        self.state = match self.state {
            State::Magic(i) => {
                if byte != MAGIC[i] {
                    return Err(malformed("incorrect header check"));
                }
                if i + 1 == MAGIC.len() {
                    State::Method
                } else {
                    State::Magic(i + 1)
                }
            }
            State::Method => {
                if byte != METHOD_DEFLATE {
                    return Err(malformed("unknown compression method"));
                }
                State::Flags
            }
            State::Flags => {
                if byte & RESERVED != 0 {
                    return Err(malformed("unknown header flags set"));
                }
                self.flags = byte;
                self.is_text = byte & FTEXT != 0;
                State::Time(0)
            }
            State::Time(i) => {
                self.scratch[i] = byte;
                if i == 3 {
                    self.time = u32::from_le_bytes(self.scratch);
                    State::ExtraFlags
                } else {
                    State::Time(i + 1)
                }
            }
            // Nothing we need to act on.
            State::ExtraFlags => State::Os,
            State::Os => {
                self.os_tag = byte;
                self.optional_field(0)
            }
            State::ExtraLength(i) => {
                // If FLG.FEXTRA is set, "optional extra fields" are present,
                // preceded by a two-byte length XLEN.
                self.scratch[i] = byte;
                if i == 1 {
                    match u16::from_le_bytes([self.scratch[0], self.scratch[1]]) {
                        0 => self.optional_field(1),
                        xlen => State::Extra(xlen),
                    }
                } else {
                    State::ExtraLength(i + 1)
                }
            }
            State::Extra(1) => self.optional_field(1),
            State::Extra(remaining) => State::Extra(remaining - 1),
            State::Name => {
                if byte == 0 {
                    self.optional_field(2)
                } else {
                    if self.name.is_full() {
                        let name = std::mem::take(&mut self.name);
                        self.name = name.grow()?;
                    }
                    self.name.push(byte);
                    State::Name
                }
            }
            State::Comment => {
                if byte == 0 {
                    self.optional_field(3)
                } else {
                    State::Comment
                }
            }
            State::HeaderCrc(i) => {
                // If FHCRC is set, a CRC16 for the gzip header is present,
                // immediately before the compressed data. The CRC16 consists
                // of the two least significant bytes of the CRC32 for all
                // bytes of the gzip header up to and not including the CRC16.
                self.scratch[i] = byte;
                if i == 1 {
                    let expected = u16::from_le_bytes([self.scratch[0], self.scratch[1]]);
                    let actual = self.hasher.clone().finalize() as u16;
                    if expected != actual {
                        return Err(malformed("header crc mismatch"));
                    }
                    State::Done
                } else {
                    State::HeaderCrc(i + 1)
                }
            }
            State::Done => return Err(malformed("header already complete")),
        };

        if self.state == State::Done {
            Ok(Some(self.finish()))
        } else {
            Ok(None)
        }
    }

    /// Picks the first optional field at or after `ORDER[from]`
    /// that the flags say is present.
    /// (They appear in the order FEXTRA, FNAME, FCOMMENT, FHCRC.)
    fn optional_field(&self, from: usize) -> State {
        const ORDER: [(u8, State); 4] = [
            (FEXTRA, State::ExtraLength(0)),
            (FNAME, State::Name),
            (FCOMMENT, State::Comment),
            (FHCRC, State::HeaderCrc(0)),
        ];
        ORDER[from..]
            .iter()
            .find(|(f, _)| self.flags & f != 0)
            .map_or(State::Done, |(_, s)| *s)
    }

    fn finish(&mut self) -> MemberHeader {
        let name = if self.flags & FNAME != 0 {
            Some(std::mem::take(&mut self.name).into_vec())
        } else {
            None
        };
        let time = match self.time {
            0 => None,
            t => DateTime::from_timestamp(t as i64, 0),
        };
        let header = MemberHeader {
            name,
            time,
            is_text: self.is_text,
            os_tag: self.os_tag,
        };
        debug!("Decoded {:?}", header);
        header
    }
}

fn malformed(msg: &str) -> GzError {
    GzError::MalformedHeader(msg.to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(bytes: &[u8]) -> GzResult<Option<MemberHeader>> {
        let mut decoder = HeaderDecoder::new();
        for (i, b) in bytes.iter().enumerate() {
            if let Some(header) = decoder.feed(*b)? {
                assert_eq!(i + 1, bytes.len(), "Header finished early");
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    #[test]
    fn minimal_header() {
        let header = MemberHeader::default();
        let bytes = header.encode(6);
        assert_eq!(bytes, [0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 3]);
        assert_eq!(decode(&bytes).unwrap(), Some(header));
    }

    #[test]
    fn name_and_time() {
        let time = DateTime::from_timestamp(1_400_000_000, 0);
        let header = MemberHeader::for_file(Some(&b"hello.txt"[..]), time, true, true);
        let bytes = header.encode(9);
        assert_eq!(bytes[3], FTEXT | FNAME);
        assert_eq!(&bytes[4..8], &1_400_000_000u32.to_le_bytes());
        assert_eq!(bytes[8], 2);
        assert_eq!(&bytes[10..], b"hello.txt\0");

        let decoded = decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded.name.as_deref(), Some(&b"hello.txt"[..]));
        assert_eq!(decoded.time, time);
        assert!(decoded.is_text);
    }

    #[test]
    fn no_name_policy() {
        let time = DateTime::from_timestamp(1_400_000_000, 0);
        let header = MemberHeader::for_file(Some(&b"hello.txt"[..]), time, false, false);
        assert_eq!(header.name, None);
        assert_eq!(header.time, None);
        assert_eq!(header.encode(1)[3..], [0, 0, 0, 0, 0, 4, 3]);
    }

    #[test]
    fn very_long_name() {
        // Bigger than a few rounds of buffer growth
        let name = "n".repeat(10_000);
        let header = MemberHeader::for_file(Some(name.as_bytes()), None, true, false);
        let decoded = decode(&header.encode(6)).unwrap().unwrap();
        assert_eq!(decoded.name.unwrap(), name.as_bytes());
    }

    #[test]
    fn optional_fields() {
        // FEXTRA + FNAME + FCOMMENT + FHCRC, as another implementation might write
        let mut bytes = vec![0x1f, 0x8b, 8, FEXTRA | FNAME | FCOMMENT | FHCRC];
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 3]);
        bytes.extend_from_slice(&[3, 0, b'a', b'b', b'c']);
        bytes.extend_from_slice(b"name\0");
        bytes.extend_from_slice(b"a comment\0");
        let crc = crc32fast::hash(&bytes) as u16;
        bytes.extend_from_slice(&crc.to_le_bytes());

        let decoded = decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded.name.as_deref(), Some(&b"name"[..]));
        assert_eq!(decoded.time, None);

        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        match decode(&bytes) {
            Err(GzError::MalformedHeader(msg)) => assert_eq!(msg, "header crc mismatch"),
            other => panic!("Expected a header CRC error, got {:?}", other),
        }
    }

    #[test]
    fn empty_extra_field() {
        let bytes = [0x1f, 0x8b, 8, FEXTRA, 0, 0, 0, 0, 0, 3, 0, 0];
        assert_eq!(decode(&bytes).unwrap(), Some(MemberHeader::default()));
    }

    #[test]
    fn bad_headers() {
        let cases: [(&[u8], &str); 3] = [
            (b"PK\x03\x04", "incorrect header check"),
            (&[0x1f, 0x8b, 7], "unknown compression method"),
            (&[0x1f, 0x8b, 8, 0x20], "unknown header flags set"),
        ];
        for (bytes, expected) in cases {
            match decode(bytes) {
                Err(GzError::MalformedHeader(msg)) => assert_eq!(msg, expected),
                other => panic!("Expected {:?}, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn incomplete_header() {
        let bytes = MemberHeader::for_file(Some(&b"x"[..]), None, true, false).encode(6);
        assert_eq!(decode(&bytes[..bytes.len() - 1]).unwrap(), None);
    }
}
