//! Walks the targets named on the command line and processes each one.
//!
//! Failures are reported and folded into the run's [`ExitStatus`];
//! one bad target never stops the rest.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use log::*;
use rustix::fs::{Dir, OFlags};
use rustix::io::Errno;

use crate::codec::*;
use crate::counter::ByteCounter;
use crate::header::MemberHeader;
use crate::options::*;
use crate::path::PathResolver;
use crate::pump::pump;
use crate::report::Reporter;
use crate::result::*;

/// Creates `path` and hands it to `write`.
///
/// Without `force`, an existing file is an error and is left alone.
/// If anything goes wrong, whatever was created is removed again,
/// so a failed target never leaves a partial output behind.
pub fn write_output<T, F>(path: &Path, force: bool, write: F) -> GzResult<T>
where
    F: FnOnce(&mut File) -> GzResult<T>,
{
    let mut options = OpenOptions::new();
    options.write(true).mode(0o666);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = options
        .open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
    debug!("Created {}", path.display());

    let result = write(&mut file);
    drop(file);
    if result.is_err() {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed partial {}", path.display()),
            Err(e) => warn!("{}: couldn't remove partial output: {}", path.display(), e),
        }
    }
    result
}

/// Sets the modification time of `file`, if we have one.
fn restore_time(file: &File, time: Option<DateTime<Utc>>) -> GzResult<()> {
    if let Some(time) = time {
        let mtime = FileTime::from_unix_time(time.timestamp(), 0);
        filetime::set_file_handle_times(file, None, Some(mtime))?;
    }
    Ok(())
}

/// Space saved, as a percentage of the uncompressed size
fn savings(compressed: u64, uncompressed: u64) -> f64 {
    if uncompressed == 0 {
        return 0.0;
    }
    100.0 * (1.0 - compressed as f64 / uncompressed as f64)
}

pub struct Walker<W> {
    options: Options,
    resolver: PathResolver,
    /// Owns standard output: listings and `-c` output both go here.
    reporter: Reporter<W>,
    status: ExitStatus,
    stdin_is_terminal: bool,
    stdout_is_terminal: bool,
}

impl<W: Write> Walker<W> {
    pub fn new(options: Options, out: W) -> Self {
        let resolver = options.resolver();
        let reporter = Reporter::new(out, options.verbose).quiet(options.quiet);
        Self {
            options,
            resolver,
            reporter,
            status: ExitStatus::Success,
            stdin_is_terminal: false,
            stdout_is_terminal: false,
        }
    }

    /// Tells the walker which standard streams are terminals,
    /// which we refuse to read or write compressed data on.
    pub fn with_terminals(mut self, stdin: bool, stdout: bool) -> Self {
        self.stdin_is_terminal = stdin;
        self.stdout_is_terminal = stdout;
        self
    }

    /// The worst outcome so far
    pub fn status(&self) -> ExitStatus {
        self.status
    }

    pub fn into_inner(self) -> W {
        self.reporter.into_inner()
    }

    /// Processes every target in order. No targets (or `-`) means standard input.
    pub fn run<I, P>(&mut self, targets: I) -> ExitStatus
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut any = false;
        for target in targets {
            any = true;
            let target = target.as_ref();
            if target == Path::new("-") {
                self.visit_stdin();
                continue;
            }
            self.visit(target);
        }
        if !any {
            self.visit_stdin();
        }

        if let Err(e) = self.reporter.get_mut().flush() {
            self.report("stdout", &e.into());
        }
        self.status
    }

    /// Logs a failed target and folds it into the exit status.
    pub fn report(&mut self, name: &str, err: &GzError) {
        error!("{}: {}", name, err);
        self.status.fold(err.exit_status());
    }

    fn visit(&mut self, path: &Path) {
        if let Err(e) = self.handle_path(path) {
            self.report(&path.display().to_string(), &e);
        }
    }

    fn visit_stdin(&mut self) {
        let stdin = io::stdin();
        let mut source = stdin.lock();
        if let Err(e) = self.handle_stream(&mut source) {
            self.report("stdin", &e);
        }
    }

    /// Opens, classifies, and processes a single path.
    pub fn handle_path(&mut self, path: &Path) -> GzResult<()> {
        let file = self.open(path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            if !self.options.recursive {
                return Err(GzError::DirectoryWithoutRecursion(path.to_owned()));
            }
            return self.descend(path, &file);
        }
        self.process(path, file, &metadata)
    }

    fn open(&self, path: &Path) -> GzResult<File> {
        let mut flags = OFlags::RDONLY | OFlags::CLOEXEC;
        if !self.options.force {
            flags |= OFlags::NOFOLLOW;
        }
        match rustix::fs::open(path, flags, rustix::fs::Mode::empty()) {
            Ok(fd) => Ok(File::from(fd)),
            // NOFOLLOW hit a link, or there's a loop somewhere in the path.
            Err(Errno::LOOP) if !self.options.force => {
                if fs::symlink_metadata(path)?.file_type().is_symlink() {
                    Err(GzError::SymlinkRejected(path.to_owned()))
                } else {
                    Err(io::Error::from(Errno::LOOP).into())
                }
            }
            Err(e) => Err(io::Error::from(e).into()),
        }
    }

    /// Processes each entry of a directory.
    ///
    /// If listing the directory fails partway, entries found so far are still
    /// processed, the rest are skipped, and the failure is returned.
    fn descend(&mut self, path: &Path, dir: &File) -> GzResult<()> {
        debug!("Descending into {}", path.display());
        let mut children: Vec<PathBuf> = Vec::new();
        let mut failure = None;

        for entry in Dir::read_from(dir).map_err(io::Error::from)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    failure = Some(io::Error::from(e));
                    break;
                }
            };
            let name = entry.file_name().to_bytes();
            if name == b"." || name == b".." {
                continue;
            }
            children.push(path.join(OsStr::from_bytes(name)));
        }

        // Outputs we're about to create mustn't be picked up as inputs.
        children.sort();
        for child in &children {
            self.visit(child);
        }

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn header_for(&self, path: &Path, metadata: &fs::Metadata) -> MemberHeader {
        let time = metadata.modified().ok().map(DateTime::<Utc>::from);
        MemberHeader::for_file(
            path.file_name().map(|n| n.as_bytes()),
            time,
            self.options.store_name,
            self.options.ascii,
        )
    }

    fn process(&mut self, path: &Path, mut file: File, metadata: &fs::Metadata) -> GzResult<()> {
        match self.options.mode {
            Mode::List => {
                self.reporter.list(Some(path), &mut file, &self.resolver)?;
                return Ok(());
            }
            Mode::Test => {
                pump(&mut GzipDecoder::new(), &mut file, &mut io::sink())?;
                info!("{}: OK", path.display());
                return Ok(());
            }
            Mode::Compress | Mode::Decompress => {}
        }

        if self.options.to_stdout {
            let session = match self.options.mode {
                Mode::Compress => {
                    CodecSession::compress(self.options.level, self.header_for(path, metadata))
                }
                _ => CodecSession::decompress(),
            };
            return self.to_stdout(session, &mut file);
        }

        let (mut session, mapping, time) = match self.options.mode {
            Mode::Compress => (
                CodecSession::compress(self.options.level, self.header_for(path, metadata)),
                self.resolver.compress_output(path),
                None,
            ),
            _ => {
                // Without restore_name, the name comes from the suffix alone.
                let stripped = if self.options.restore_name {
                    None
                } else {
                    Some(self.resolver.strip_suffix(path)?)
                };
                // Nothing is created until the input looks like gzip.
                let mut decoder = GzipDecoder::new();
                let header = decoder.read_header(&mut file)?;
                let (mapping, time) = match stripped {
                    Some(mapping) => (mapping, None),
                    None => (
                        self.resolver
                            .decompress_output(path, header.name.as_deref())?,
                        header.time,
                    ),
                };
                (CodecSession::Decompress(decoder), mapping, time)
            }
        };
        if mapping.destination == mapping.source {
            return Err(GzError::InvalidPath(format!(
                "{} would overwrite itself",
                mapping.destination.display()
            )));
        }
        debug!(
            "{} -> {}",
            mapping.source.display(),
            mapping.destination.display()
        );

        let written = write_output(&mapping.destination, self.options.force, |out| {
            let mut sink = ByteCounter::new(&mut *out);
            pump(&mut session, &mut file, &mut sink)?;
            let written = sink.count();
            restore_time(out, time)?;
            Ok(written)
        })?;

        let (compressed, uncompressed) = match session.direction() {
            Direction::Compress => (written, metadata.len()),
            Direction::Decompress => (metadata.len(), written),
        };
        let removes = self.options.removes_sources();
        info!(
            "{}: {:5.1}% -- {} {}",
            path.display(),
            savings(compressed, uncompressed),
            if removes { "replaced with" } else { "created" },
            mapping.destination.display()
        );

        drop(file);
        if removes {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn to_stdout<R: Read + ?Sized>(
        &mut self,
        mut session: CodecSession,
        source: &mut R,
    ) -> GzResult<()> {
        if session.direction() == Direction::Compress
            && self.stdout_is_terminal
            && !self.options.force
        {
            return Err(GzError::Terminal("written to"));
        }
        pump(&mut session, source, self.reporter.get_mut())
    }

    /// Processes standard input, or anything standing in for it.
    ///
    /// Output goes to standard output, except when decompressing
    /// with `restore_name` a member with a stored name:
    /// that's written to the current directory under the stored name.
    pub fn handle_stream<R: Read>(&mut self, source: &mut R) -> GzResult<()> {
        if self.options.mode != Mode::Compress && self.stdin_is_terminal && !self.options.force {
            return Err(GzError::Terminal("read from"));
        }

        match self.options.mode {
            Mode::List => {
                self.reporter.list(None, source, &self.resolver)?;
                Ok(())
            }
            Mode::Test => {
                pump(&mut GzipDecoder::new(), source, &mut io::sink())?;
                info!("stdin: OK");
                Ok(())
            }
            Mode::Compress => {
                let header = MemberHeader::for_file(
                    None,
                    None,
                    self.options.store_name,
                    self.options.ascii,
                );
                self.to_stdout(CodecSession::compress(self.options.level, header), source)
            }
            Mode::Decompress if self.options.restore_name && !self.options.to_stdout => {
                let mut decoder = GzipDecoder::new();
                let header = decoder.read_header(source)?;
                let name = match header.name.as_deref() {
                    Some(name) => name,
                    None => return pump(&mut decoder, source, self.reporter.get_mut()),
                };
                let mapping = self
                    .resolver
                    .decompress_output(Path::new("-"), Some(name))?;
                write_output(&mapping.destination, self.options.force, |out| {
                    pump(&mut decoder, source, out)?;
                    restore_time(out, header.time)
                })?;
                info!("stdin: decompressed to {}", mapping.destination.display());
                Ok(())
            }
            Mode::Decompress => self.to_stdout(CodecSession::decompress(), source),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::fs::symlink;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut session = CodecSession::compress(6, MemberHeader::default());
        let mut out = Vec::new();
        pump(&mut session, &mut &data[..], &mut out).unwrap();
        out
    }

    #[test]
    fn failed_writes_leave_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");

        let result: GzResult<()> = write_output(&path, false, |out| {
            out.write_all(b"partial")?;
            Err(GzError::CorruptStream(String::from("invalid block type")))
        });
        assert!(matches!(result, Err(GzError::CorruptStream(_))));
        assert!(!path.exists());

        write_output(&path, false, |out| Ok(out.write_all(b"whole")?)).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"whole");
    }

    #[test]
    fn existing_outputs_need_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        fs::write(&path, b"precious").unwrap();

        match write_output(&path, false, |out| Ok(out.write_all(b"new")?)) {
            Err(GzError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::AlreadyExists),
            other => panic!("Expected AlreadyExists, got {:?}", other),
        }
        assert_eq!(fs::read(&path).unwrap(), b"precious");

        write_output(&path, true, |out| Ok(out.write_all(b"new")?)).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn symlinks_need_force() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, b"pointed at").unwrap();
        symlink(&target, &link).unwrap();

        let mut walker = Walker::new(Options::default(), Vec::new());
        match walker.handle_path(&link) {
            Err(GzError::SymlinkRejected(p)) => assert_eq!(p, link),
            other => panic!("Expected the link to be rejected, got {:?}", other),
        }
        assert!(!dir.path().join("link.gz").exists());

        let options = Options {
            force: true,
            ..Options::default()
        };
        let mut walker = Walker::new(options, Vec::new());
        walker.handle_path(&link).unwrap();
        assert!(dir.path().join("link.gz").exists());
        assert!(!link.exists());
        assert!(target.exists());
    }

    #[test]
    fn directories_need_recursion() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("file"), b"contents").unwrap();

        let mut walker = Walker::new(Options::default(), Vec::new());
        assert_eq!(walker.run([&root]), ExitStatus::Warning);
        assert!(root.join("file").exists());
    }

    #[test]
    fn bad_headers_create_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("x.gz");
        let existing = dir.path().join("x");
        fs::write(&source, b"not gzip at all").unwrap();
        fs::write(&existing, b"precious").unwrap();

        for restore_name in [false, true] {
            let options = Options {
                mode: Mode::Decompress,
                force: true,
                restore_name,
                ..Options::default()
            };
            let mut walker = Walker::new(options, Vec::new());
            match walker.handle_path(&source) {
                Err(GzError::MalformedHeader(msg)) => assert_eq!(msg, "incorrect header check"),
                other => panic!("Expected a bad header, got {:?}", other),
            }
            assert_eq!(fs::read(&existing).unwrap(), b"precious");
            assert!(source.exists());
        }

        // Same for an empty input
        fs::write(&source, b"").unwrap();
        let options = Options {
            mode: Mode::Decompress,
            force: true,
            ..Options::default()
        };
        let mut walker = Walker::new(options, Vec::new());
        assert!(matches!(
            walker.handle_path(&source),
            Err(GzError::EmptyOrTruncatedInput)
        ));
        assert_eq!(fs::read(&existing).unwrap(), b"precious");
    }

    #[test]
    fn stdin_is_written_to_out() {
        let options = Options {
            mode: Mode::Decompress,
            ..Options::default()
        };
        let mut walker = Walker::new(options, Vec::new());
        walker
            .handle_stream(&mut &compress(b"from stdin")[..])
            .unwrap();
        assert_eq!(walker.into_inner(), b"from stdin");
    }

    #[test]
    fn terminals_are_refused() {
        let options = Options {
            mode: Mode::Decompress,
            ..Options::default()
        };
        let mut walker = Walker::new(options, Vec::new()).with_terminals(true, false);
        assert!(matches!(
            walker.handle_stream(&mut &b""[..]),
            Err(GzError::Terminal("read from"))
        ));

        let mut walker = Walker::new(Options::default(), Vec::new()).with_terminals(false, true);
        assert!(matches!(
            walker.handle_stream(&mut &b"data"[..]),
            Err(GzError::Terminal("written to"))
        ));

        let options = Options {
            force: true,
            ..Options::default()
        };
        let mut walker = Walker::new(options, Vec::new()).with_terminals(true, true);
        walker.handle_stream(&mut &b"data"[..]).unwrap();
        assert!(!walker.into_inner().is_empty());
    }

    #[test]
    fn savings_percentages() {
        assert_eq!(savings(25, 100), 75.0);
        assert_eq!(savings(0, 0), 0.0);
        assert!(savings(120, 100) < 0.0);
    }
}
