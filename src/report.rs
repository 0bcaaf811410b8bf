//! Listing compressed files (`-l`)

use std::io::{self, Read, Write};
use std::path::Path;
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Local, Utc};
use log::*;

use crate::codec::*;
use crate::counter::ByteCounter;
use crate::path::PathResolver;
use crate::pump::pump;
use crate::result::*;

/// Width of the size columns: enough for any `u64`
const SIZE_WIDTH: usize = 20;

/// What we found out about one compressed file
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    /// Bytes of compressed input, headers and trailers included
    pub compressed: u64,
    /// Bytes it decodes to
    pub uncompressed: u64,
    pub crc: Option<u32>,
    pub time: Option<DateTime<Utc>>,
    /// The name decompression would give it
    pub name: String,
}

impl Listing {
    /// Compressed size as a percentage of the decoded size
    pub fn ratio(&self) -> f64 {
        if self.uncompressed == 0 {
            return 0.0;
        }
        self.compressed as f64 / self.uncompressed as f64 * 100.0
    }
}

/// Writes listing lines, with a column header before the first one.
pub struct Reporter<W> {
    out: W,
    verbose: bool,
    quiet: bool,
    header_printed: bool,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            quiet: false,
            header_printed: false,
        }
    }

    /// Leaves out the column header.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Decodes all of `source` and lists it.
    ///
    /// `source_name` is `None` for standard input,
    /// which is listed under its stored name, or `-` if it has none.
    pub fn list<R: Read + ?Sized>(
        &mut self,
        source_name: Option<&Path>,
        source: &mut R,
        resolver: &PathResolver,
    ) -> GzResult<Listing> {
        let mut decoder = GzipDecoder::new();
        let mut counted = ByteCounter::new(source);
        let mut sink = ByteCounter::new(io::sink());
        pump(&mut decoder, &mut counted, &mut sink)?;

        let header = decoder.header().cloned().unwrap_or_default();
        let stored_name = header.name.as_deref();
        let name = match (source_name, stored_name) {
            (Some(path), _) => resolver
                .decompress_output(path, stored_name)?
                .destination
                .display()
                .to_string(),
            (None, Some(_)) => resolver
                .decompress_output(Path::new("-"), stored_name)?
                .destination
                .display()
                .to_string(),
            (None, None) => String::from("-"),
        };

        let listing = Listing {
            compressed: counted.count(),
            uncompressed: sink.count(),
            crc: decoder.crc(),
            time: header.time,
            name,
        };
        debug!("{:?}", listing);
        self.print(&listing)?;
        Ok(listing)
    }

    fn print(&mut self, listing: &Listing) -> io::Result<()> {
        if !self.header_printed && !self.quiet {
            if self.verbose {
                write!(self.out, "method   crc      date     time     ")?;
            }
            writeln!(
                self.out,
                "{:>w$} {:>w$}  ratio  uncompressed name",
                "compressed",
                "uncompressed",
                w = SIZE_WIDTH
            )?;
        }
        self.header_printed = true;

        if self.verbose {
            let time = listing
                .time
                .unwrap_or_else(|| DateTime::<Utc>::from(UNIX_EPOCH))
                .with_timezone(&Local);
            write!(
                self.out,
                "deflate  {:08x} {} ",
                listing.crc.unwrap_or(0),
                time.format("%x %X")
            )?;
        }
        writeln!(
            self.out,
            "{:>w$} {:>w$}  {:5.2}  {}",
            listing.compressed,
            listing.uncompressed,
            listing.ratio(),
            listing.name,
            w = SIZE_WIDTH
        )
    }
}
