//! What a run was asked to do

use crate::codec::Direction;
use crate::path::PathResolver;

/// The operation applied to every target
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    Compress,
    Decompress,
    /// Print sizes and names of compressed files instead of writing anything.
    List,
    /// Decompress, but throw the output away.
    Test,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub mode: Mode,
    /// Write to standard output and leave sources alone.
    pub to_stdout: bool,
    /// Overwrite existing outputs, follow symlinks, and put up with terminals.
    pub force: bool,
    /// Don't remove sources after success.
    pub keep: bool,
    /// Descend into directories.
    pub recursive: bool,
    pub suffix: String,
    /// DEFLATE level, 1 (fastest) to 9 (best)
    pub level: u32,
    /// Mark compressed members as text.
    pub ascii: bool,
    /// Store the source's name and modification time when compressing.
    pub store_name: bool,
    /// Use the stored name and time when decompressing.
    pub restore_name: bool,
    pub verbose: bool,
    /// Only print errors; listings go without their column header.
    pub quiet: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: Mode::Compress,
            to_stdout: false,
            force: false,
            keep: false,
            recursive: false,
            suffix: String::from(".gz"),
            level: 6,
            ascii: false,
            store_name: true,
            restore_name: false,
            verbose: false,
            quiet: false,
        }
    }
}

impl Options {
    pub fn direction(&self) -> Direction {
        match self.mode {
            Mode::Compress => Direction::Compress,
            Mode::Decompress | Mode::List | Mode::Test => Direction::Decompress,
        }
    }

    pub fn resolver(&self) -> PathResolver {
        PathResolver::new(self.suffix.as_str())
    }

    /// Whether sources are removed once their output is complete
    pub fn removes_sources(&self) -> bool {
        !self.keep && !self.to_stdout && matches!(self.mode, Mode::Compress | Mode::Decompress)
    }
}
