//! Command-line interface.
//!
//! Follows bzip2 conventions: `-d` selects decompression, `-1`..`-9` the
//! block-size tier, bare operands are input files, and no operands means
//! filter mode between stdin and stdout. Parsing produces an [`Options`]
//! value the harness and pipelines consume; nothing below this module
//! looks at `argv` again.

use clap::Parser;

use crate::file::DEFAULT_SUFFIX;
use crate::Options;

#[derive(Parser, Debug)]
#[command(
    name = "parbz",
    version,
    about = "Parallel bzip2-compatible compressor and decompressor",
    after_help = "With no FILE, read standard input and write standard output."
)]
pub struct Args {
    /// Decompress instead of compress
    #[arg(short, long)]
    pub decompress: bool,

    /// Compress (the default; counters an earlier -d)
    #[arg(short = 'z', long, overrides_with = "decompress")]
    pub compress: bool,

    /// Check integrity of compressed FILEs, write nothing
    #[arg(short, long)]
    pub test: bool,

    /// Write to standard output, keep input files
    #[arg(short = 'c', long = "stdout")]
    pub stdout: bool,

    /// Keep input files (do not delete them)
    #[arg(short, long)]
    pub keep: bool,

    /// Overwrite existing output files; allow terminals and odd inputs
    #[arg(short, long)]
    pub force: bool,

    /// Number of worker threads (default: number of processors)
    #[arg(short = 'n', long = "threads", value_name = "N")]
    pub threads: Option<u32>,

    /// Report byte counts and compression ratio
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress warnings
    #[arg(short, long)]
    pub quiet: bool,

    /// Compressed-file suffix to append/strip (default ".bz2")
    #[arg(short = 'S', long, value_name = "SUF")]
    pub suffix: Option<String>,

    /// Always use the guaranteed-linear block-sorting algorithm
    #[arg(long)]
    pub exponential: bool,

    /// Print monitor contention counters after each file
    #[arg(long = "print-cctrs")]
    pub print_cctrs: bool,

    #[arg(short = '1', hide = true)]
    pub bs1: bool,
    #[arg(short = '2', hide = true)]
    pub bs2: bool,
    #[arg(short = '3', hide = true)]
    pub bs3: bool,
    #[arg(short = '4', hide = true)]
    pub bs4: bool,
    #[arg(short = '5', hide = true)]
    pub bs5: bool,
    #[arg(short = '6', hide = true)]
    pub bs6: bool,
    #[arg(short = '7', hide = true)]
    pub bs7: bool,
    #[arg(short = '8', hide = true)]
    pub bs8: bool,
    /// Block size 100k..900k; -9 is the default
    #[arg(short = '9')]
    pub bs9: bool,

    /// Files to (de)compress
    #[arg(value_name = "FILE")]
    pub files: Vec<std::path::PathBuf>,
}

impl Args {
    /// The bs100k tier: the highest digit flag given, 9 by default.
    fn bs100k(&self) -> u32 {
        let digits = [
            self.bs1, self.bs2, self.bs3, self.bs4, self.bs5, self.bs6, self.bs7, self.bs8,
            self.bs9,
        ];
        digits
            .iter()
            .rposition(|&set| set)
            .map(|i| i as u32 + 1)
            .unwrap_or(9)
    }

    pub fn to_options(&self) -> Options {
        let num_workers = self.threads.unwrap_or_else(|| num_cpus::get() as u32).max(1);
        // One spare slot beyond the workers keeps the decompressor's
        // slot-chain waits from starving the splitter.
        let num_slots = (4 * num_workers).max(num_workers + 1);

        Options {
            num_workers,
            num_slots,
            bs100k: self.bs100k(),
            decompress: self.decompress || self.test,
            test: self.test,
            keep: self.keep || self.stdout || self.test,
            force: self.force,
            stdout_mode: self.stdout,
            verbose: self.verbose && !self.quiet,
            print_cctrs: self.print_cctrs,
            exponential: self.exponential,
            suffix: self.suffix.clone().unwrap_or_else(|| DEFAULT_SUFFIX.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("parbz").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let o = parse(&[]).to_options();
        assert!(!o.decompress);
        assert_eq!(o.bs100k, 9);
        assert!(o.num_workers >= 1);
        assert!(o.num_slots > o.num_workers);
        assert_eq!(o.suffix, ".bz2");
    }

    #[test]
    fn digit_flags_pick_block_size() {
        assert_eq!(parse(&["-1"]).to_options().bs100k, 1);
        assert_eq!(parse(&["-5"]).to_options().bs100k, 5);
        // The larger of several wins, as with bzip2.
        assert_eq!(parse(&["-2", "-7"]).to_options().bs100k, 7);
    }

    #[test]
    fn test_mode_implies_decompress_and_keep() {
        let o = parse(&["-t", "x.bz2"]).to_options();
        assert!(o.decompress && o.test && o.keep);
    }

    #[test]
    fn stdout_implies_keep() {
        assert!(parse(&["-c"]).to_options().keep);
    }

    #[test]
    fn thread_count_and_files() {
        let a = parse(&["-n", "3", "a", "b"]);
        let o = a.to_options();
        assert_eq!(o.num_workers, 3);
        assert_eq!(o.num_slots, 12);
        assert_eq!(a.files.len(), 2);
    }

    #[test]
    fn quiet_beats_verbose() {
        assert!(!parse(&["-v", "-q"]).to_options().verbose);
    }
}
