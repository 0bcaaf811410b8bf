use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::*;
use log::*;
use structopt::*;

use sgz::{Mode, Options, Walker};

#[derive(Debug, StructOpt)]
#[structopt(name = "sgz", about = "Compresses or decompresses files in the gzip format")]
struct Opt {
    /// Mark compressed data as text
    #[structopt(short, long)]
    ascii: bool,

    /// Write to standard output and keep the original files
    #[structopt(short = "c", long = "stdout", alias = "to-stdout")]
    stdout: bool,

    #[structopt(short, long, alias = "uncompress")]
    decompress: bool,

    /// Overwrite existing files, follow symlinks, and use terminals anyways
    #[structopt(short, long)]
    force: bool,

    /// Keep (don't delete) input files
    #[structopt(short, long)]
    keep: bool,

    /// List compressed sizes, uncompressed sizes, and names
    #[structopt(short, long)]
    list: bool,

    /// Don't save or restore the original name and time stamp
    #[structopt(short = "n", long, overrides_with = "name")]
    no_name: bool,

    /// Save or restore the original name and time stamp
    #[structopt(short = "N", long, overrides_with = "no-name")]
    name: bool,

    /// Only print errors
    #[structopt(short, long)]
    quiet: bool,

    /// Operate recursively on directories
    #[structopt(short, long)]
    recursive: bool,

    /// Use the given suffix on compressed files
    #[structopt(short = "S", long, default_value = ".gz")]
    suffix: String,

    /// Test compressed files' integrity
    #[structopt(short, long)]
    test: bool,

    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Compress faster (level 1)
    #[structopt(short = "1", long)]
    fast: bool,

    /// Compress better (level 9)
    #[structopt(short = "9", long)]
    best: bool,

    /// Compression level, from 1 (fastest) to 9 (best)
    #[structopt(long, parse(try_from_str = parse_level))]
    level: Option<u32>,

    /// Files (or with -r, directories) to process. `-` is standard input.
    #[structopt(name("FILE"), parse(from_os_str))]
    files: Vec<PathBuf>,
}

fn parse_level(s: &str) -> Result<u32> {
    let level: u32 = s.parse()?;
    ensure!((1..=9).contains(&level), "level must be between 1 and 9");
    Ok(level)
}

fn options_from(args: &Opt) -> Result<Options> {
    ensure!(!args.suffix.is_empty(), "suffix can't be empty");
    ensure!(
        !args.suffix.contains('/'),
        "suffix {:?} can't contain a path separator",
        args.suffix
    );

    let mode = if args.list {
        Mode::List
    } else if args.test {
        Mode::Test
    } else if args.decompress {
        Mode::Decompress
    } else {
        Mode::Compress
    };

    let level = match (args.level, args.best, args.fast) {
        (Some(l), _, _) => l,
        (None, true, _) => 9,
        (None, false, true) => 1,
        (None, false, false) => 6,
    };

    let defaults = Options::default();
    let (store_name, restore_name) = if args.no_name {
        (false, false)
    } else if args.name {
        (true, true)
    } else {
        (defaults.store_name, defaults.restore_name)
    };

    Ok(Options {
        mode,
        to_stdout: args.stdout,
        force: args.force,
        keep: args.keep,
        recursive: args.recursive,
        suffix: args.suffix.clone(),
        level,
        ascii: args.ascii,
        store_name,
        restore_name,
        verbose: args.verbose > 0,
        quiet: args.quiet,
    })
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbose + 1);
    errlog.quiet(args.quiet);
    errlog.init()?;

    let options = options_from(&args)?;
    debug!("{:?}", options);

    let mut walker = Walker::new(options, io::stdout())
        .with_terminals(io::stdin().is_terminal(), io::stdout().is_terminal());
    let status = walker.run(&args.files);
    std::process::exit(status.code());
}
