//! sgz compresses and decompresses files in the gzip format (RFC 1952),
//! streaming them through fixed-size buffers:
//!
//! ```no_run
//! # use std::fs::File;
//! # use std::io;
//! # use sgz::*;
//! let mut source = File::open("foo.txt")?;
//! let mut sink = File::create("foo.txt.gz")?;
//!
//! let header = MemberHeader::for_file(Some(&b"foo.txt"[..]), None, true, false);
//! let mut codec = CodecSession::compress(6, header);
//! pump(&mut codec, &mut source, &mut sink)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Decompression works the same way, and handles any number of
//! concatenated members, each with its own header and trailer:
//! ```no_run
//! # use std::fs::File;
//! # use std::io;
//! # use sgz::*;
//! let mut source = File::open("foo.txt.gz")?;
//!
//! // We can read the first member's header before anything else,
//! // say, to find the name it was compressed under.
//! let mut decoder = GzipDecoder::new();
//! let header = decoder.read_header(&mut source)?;
//! println!("Stored name: {:?}", header.name);
//!
//! pump(&mut decoder, &mut source, &mut io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! On top of that, [`Walker`] does what the `sgz` command line tool does
//! for each file (or directory, or standard input) it's given:
//! works out where the output goes, creates it without clobbering anything,
//! and removes the original once the output is complete.
//! A target that fails leaves no partial output behind.

pub mod buffer;
pub mod codec;
pub mod counter;
pub mod header;
pub mod options;
pub mod path;
pub mod pump;
pub mod report;
pub mod result;
pub mod walk;

pub use codec::{Codec, CodecSession, GzipDecoder, GzipEncoder};
pub use header::MemberHeader;
pub use options::{Mode, Options};
pub use path::PathResolver;
pub use pump::pump;
pub use report::Reporter;
pub use result::{ExitStatus, GzError, GzResult};
pub use walk::Walker;
