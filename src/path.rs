//! Works out where output goes.
//!
//! Unix paths are bytes, not text, so everything here works on bytes
//! and a name that isn't UTF-8 is just as good as one that is.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

use log::*;

use crate::result::*;

/// Suffixes recognized when the configured one isn't there, in order.
/// These are matched regardless of case.
pub const FALLBACK_SUFFIXES: [&str; 6] = [".gz", "-gz", ".z", "-z", "_z", ".tgz"];

/// Source and destination of a single target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// The suffix added or stripped, if any
    pub suffix: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    suffix: String,
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new(".gz")
    }
}

/// Returns `path` without `suffix`, if it ends with it.
fn without_suffix<'a>(path: &'a [u8], suffix: &str, ignore_case: bool) -> Option<&'a [u8]> {
    let suffix = suffix.as_bytes();
    let cut = path.len().checked_sub(suffix.len())?;
    let (stem, tail) = path.split_at(cut);
    let matches = if ignore_case {
        tail.eq_ignore_ascii_case(suffix)
    } else {
        tail == suffix
    };
    matches.then_some(stem)
}

impl PathResolver {
    pub fn new<S: Into<String>>(suffix: S) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// The compressed file's path: the source with our suffix tacked on.
    pub fn compress_output(&self, source: &Path) -> PathMapping {
        let mut destination = source.as_os_str().to_owned();
        destination.push(&self.suffix);
        PathMapping {
            source: source.to_owned(),
            destination: PathBuf::from(destination),
            suffix: Some(self.suffix.clone()),
        }
    }

    /// Strips our suffix (or failing that, a fallback one) from `source`.
    pub fn strip_suffix(&self, source: &Path) -> GzResult<PathMapping> {
        let path = source.as_os_str().as_bytes();
        let stripped = without_suffix(path, &self.suffix, false)
            .map(|s| (s, self.suffix.as_str()))
            .or_else(|| {
                FALLBACK_SUFFIXES
                    .iter()
                    .find_map(|suf| without_suffix(path, suf, true).map(|s| (s, *suf)))
            });

        match stripped {
            // Don't leave nothing (or just a directory) behind.
            Some((stem, suffix))
                if Path::new(OsStr::from_bytes(stem)).file_name().is_some()
                    && !stem.ends_with(b"/") =>
            {
                trace!("Stripped {} from {}", suffix, source.display());
                Ok(PathMapping {
                    source: source.to_owned(),
                    destination: PathBuf::from(OsStr::from_bytes(stem)),
                    suffix: Some(suffix.to_owned()),
                })
            }
            _ => Err(GzError::UnrecognizedSuffix(source.to_owned())),
        }
    }

    /// The decompressed file's path.
    ///
    /// With a name stored in the member header, only its final component is used,
    /// placed next to `source`. We decide where output goes, not the input file.
    /// Otherwise, the suffix is stripped from `source`.
    pub fn decompress_output(
        &self,
        source: &Path,
        stored_name: Option<&[u8]>,
    ) -> GzResult<PathMapping> {
        let stored_name = match stored_name {
            Some(n) => Path::new(OsStr::from_bytes(n)),
            None => return self.strip_suffix(source),
        };

        let bare = match stored_name.components().next_back() {
            Some(Component::Normal(n)) => n,
            _ => {
                return Err(GzError::InvalidPath(format!(
                    "Stored name {:?} has no file name",
                    stored_name
                )))
            }
        };
        if bare != stored_name.as_os_str() {
            warn!(
                "{}: using {} from stored name {}",
                source.display(),
                Path::new(bare).display(),
                stored_name.display()
            );
        }

        let destination = match source.parent() {
            Some(parent) => parent.join(bare),
            None => PathBuf::from(bare),
        };
        Ok(PathMapping {
            source: source.to_owned(),
            destination,
            suffix: None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn strip(resolver: &PathResolver, path: &str) -> GzResult<PathBuf> {
        resolver
            .strip_suffix(Path::new(path))
            .map(|m| m.destination)
    }

    fn raw(bytes: &[u8]) -> &Path {
        Path::new(OsStr::from_bytes(bytes))
    }

    #[test]
    fn compress_appends() {
        let resolver = PathResolver::default();
        let mapping = resolver.compress_output(Path::new("dir/file.txt"));
        assert_eq!(mapping.destination, Path::new("dir/file.txt.gz"));
        assert_eq!(
            PathResolver::new("_x")
                .compress_output(Path::new("a"))
                .destination,
            Path::new("a_x")
        );
    }

    #[test]
    fn strip_is_inverse_of_append() {
        for suffix in std::iter::once(".gz").chain(FALLBACK_SUFFIXES.iter().copied()) {
            let resolver = PathResolver::default();
            let path = format!("some/dir/file.tar{}", suffix);
            assert_eq!(strip(&resolver, &path).unwrap(), Path::new("some/dir/file.tar"));
        }
        let custom = PathResolver::new(".squash");
        let mapped = custom.compress_output(Path::new("x.bin")).destination;
        assert_eq!(
            custom.strip_suffix(&mapped).unwrap().destination,
            Path::new("x.bin")
        );
    }

    #[test]
    fn fallbacks_ignore_case() {
        let resolver = PathResolver::default();
        assert_eq!(strip(&resolver, "FILE.GZ").unwrap(), Path::new("FILE"));
        assert_eq!(strip(&resolver, "file.Z").unwrap(), Path::new("file"));
        assert_eq!(strip(&resolver, "archive.TGZ").unwrap(), Path::new("archive"));

        // ...but the configured suffix doesn't.
        let resolver = PathResolver::new(".pack");
        assert!(strip(&resolver, "file.PACK").is_err());
    }

    #[test]
    fn unknown_suffix() {
        let resolver = PathResolver::default();
        for path in ["foo.bin", "gz", "dir/.gz", ".gz", "caf\u{e9}"] {
            match resolver.strip_suffix(Path::new(path)) {
                Err(GzError::UnrecognizedSuffix(p)) => assert_eq!(p, Path::new(path)),
                other => panic!("Expected {} to be rejected, got {:?}", path, other),
            }
        }
    }

    #[test]
    fn names_needn_t_be_utf8() {
        let resolver = PathResolver::default();
        let source = raw(b"dir/caf\xe9.txt");

        let compressed = resolver.compress_output(source).destination;
        assert_eq!(compressed, raw(b"dir/caf\xe9.txt.gz"));
        assert_eq!(resolver.strip_suffix(&compressed).unwrap().destination, source);
        assert_eq!(
            resolver.strip_suffix(raw(b"\xff\xfe.GZ")).unwrap().destination,
            raw(b"\xff\xfe")
        );

        // A Latin-1 stored name is used as-is.
        let mapping = resolver
            .decompress_output(Path::new("in/data.gz"), Some(&b"r\xe9sum\xe9"[..]))
            .unwrap();
        assert_eq!(mapping.destination, raw(b"in/r\xe9sum\xe9"));
    }

    #[test]
    fn stored_names() {
        let resolver = PathResolver::default();
        let source = Path::new("in/data.gz");

        let mapping = resolver.decompress_output(source, Some(&b"orig.txt"[..])).unwrap();
        assert_eq!(mapping.destination, Path::new("in/orig.txt"));

        // Only the bare name is trusted.
        let mapping = resolver
            .decompress_output(source, Some(&b"../../etc/passwd"[..]))
            .unwrap();
        assert_eq!(mapping.destination, Path::new("in/passwd"));
        let mapping = resolver.decompress_output(source, Some(&b"/abs/x"[..])).unwrap();
        assert_eq!(mapping.destination, Path::new("in/x"));

        let bad: [&[u8]; 4] = [b"..", b"/", b"", b"."];
        for bad in bad {
            assert!(matches!(
                resolver.decompress_output(source, Some(bad)),
                Err(GzError::InvalidPath(_))
            ));
        }

        let mapping = resolver
            .decompress_output(Path::new("top.gz"), Some(&b"orig"[..]))
            .unwrap();
        assert_eq!(mapping.destination, Path::new("orig"));

        let mapping = resolver.decompress_output(source, None).unwrap();
        assert_eq!(mapping.destination, Path::new("in/data"));
    }
}
