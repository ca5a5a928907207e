//! Per-file orchestration: signals, output-path lifecycle, and the
//! pipeline thread.
//!
//! The fatal-error protocol is process-wide: every interesting signal is
//! blocked in every thread, the main thread alone waits for them, and a
//! pipeline thread that hits a fatal condition prints its diagnostic and
//! raises `SIGUSR1` at the process. Successful pipeline completion raises
//! `SIGUSR2`. The main thread reacts by either finalizing the output file
//! (ownership, permissions, timestamps, input removal) or unlinking the
//! partial output, also on `SIGINT`/`SIGTERM`, which are then re-raised
//! with default disposition so the exit status reflects the signal.
//!
//! No cancellation tokens exist anywhere: fatal errors end the process,
//! so stuck sibling threads are irrelevant by construction.

use std::fmt::Display;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use filetime::FileTime;
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{Gid, Pid, Uid};

use crate::file::{compressed_name, decompressed_name, ByteSink, ByteSource, FileSpec};
use crate::pipeline::{compress, decompress, serial, Report};
use crate::Options;

static PROGRAM_NAME: OnceLock<String> = OnceLock::new();

/// Record argv[0]'s basename for diagnostics; done once at startup.
pub fn set_program_name() {
    let name = std::env::args()
        .next()
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_name)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "parbz".into());
    let _ = PROGRAM_NAME.set(name);
}

pub fn program_name() -> &'static str {
    PROGRAM_NAME.get().map(String::as_str).unwrap_or("parbz")
}

/// Fatal error inside a pipeline thread: emit the diagnostic, wake the
/// main thread, and put this thread to rest; the process is about to
/// exit and nothing here can be unwound safely past the monitors.
pub fn thread_fatal(label: &str, err: &dyn Display) -> ! {
    eprintln!("{}: {}: {}", program_name(), label, err);
    let _ = signal::kill(Pid::this(), Signal::SIGUSR1);
    loop {
        std::thread::park();
    }
}

/// A non-fatal per-file complaint (the file gets skipped).
fn warn(msg: impl Display) {
    eprintln!("{}: {}", program_name(), msg);
}

const HANDLED: [Signal; 6] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGPIPE,
    Signal::SIGXFSZ,
];

/// Block the signal set in the main thread before any other thread
/// exists, so every thread inherits the mask.
pub fn init_signals() -> Result<()> {
    let mut set = SigSet::empty();
    for s in HANDLED {
        set.add(s);
    }
    signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None)
        .context("blocking signals")?;
    Ok(())
}

/// Per-file result the exit code is computed from.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped,
}

/// Process the stdin→stdout filter case.
pub fn process_stdio(opts: &Options) -> Result<Outcome> {
    if !opts.decompress && !opts.force && std::io::stdout().is_terminal() && !opts.test {
        warn("won't write compressed data to a terminal, use -f to force");
        return Ok(Outcome::Skipped);
    }
    if opts.decompress && !opts.force && std::io::stdin().is_terminal() {
        warn("won't read compressed data from a terminal, use -f to force");
        return Ok(Outcome::Skipped);
    }

    let ispec = FileSpec::stdin();
    let ospec = if opts.test { FileSpec::discard() } else { FileSpec::stdout() };
    run_pipeline(opts, ispec, ospec, None, None)
}

/// Process one named input file.
pub fn process_file(opts: &Options, input: &Path) -> Result<Outcome> {
    let meta = match fs::symlink_metadata(input) {
        Ok(m) => m,
        Err(e) => {
            warn(format_args!("\"{}\": {}", input.display(), e));
            return Ok(Outcome::Skipped);
        }
    };
    if !meta.is_file() {
        warn(format_args!("\"{}\": not a regular file, skipping", input.display()));
        return Ok(Outcome::Skipped);
    }

    // Resolve where output goes.
    let out_path: Option<PathBuf> = if opts.stdout_mode || opts.test {
        None
    } else if opts.decompress {
        match decompressed_name(input, &opts.suffix) {
            Some(p) => Some(p),
            None => {
                warn(format_args!(
                    "\"{}\": unknown suffix, skipping (use -c to force)",
                    input.display()
                ));
                return Ok(Outcome::Skipped);
            }
        }
    } else {
        Some(compressed_name(input, &opts.suffix))
    };

    if let Some(out) = &out_path {
        if out.exists() {
            if !opts.force {
                warn(format_args!("\"{}\": output exists, skipping", out.display()));
                return Ok(Outcome::Skipped);
            }
            fs::remove_file(out)
                .with_context(|| format!("removing \"{}\"", out.display()))?;
        }
    }

    if out_path.is_none() && !opts.test && !opts.decompress && !opts.force
        && std::io::stdout().is_terminal()
    {
        warn("won't write compressed data to a terminal, use -f to force");
        return Ok(Outcome::Skipped);
    }

    let ispec = match FileSpec::open(input) {
        Ok(s) => s,
        Err(e) => {
            warn(format_args!("\"{}\": {}", input.display(), e));
            return Ok(Outcome::Skipped);
        }
    };

    let ospec = match &out_path {
        Some(p) => match FileSpec::create(p) {
            Ok(s) => s,
            Err(e) => {
                warn(format_args!("\"{}\": {}", p.display(), e));
                return Ok(Outcome::Skipped);
            }
        },
        None if opts.test => FileSpec::discard(),
        None => FileSpec::stdout(),
    };

    run_pipeline(opts, ispec, ospec, Some(input.to_path_buf()), out_path)
}

/// Spawn the pipeline leader, wait for its signal, and settle the files.
fn run_pipeline(
    opts: &Options,
    ispec: FileSpec<ByteSource>,
    ospec: FileSpec<ByteSink>,
    in_path: Option<PathBuf>,
    out_path: Option<PathBuf>,
) -> Result<Outcome> {
    let in_label = ispec.label.clone();
    let opts2 = opts.clone();

    let leader = std::thread::spawn(move || {
        let result = if opts2.decompress {
            if opts2.num_workers == 1 {
                serial::decompress_serial(ispec, ospec, opts2.num_slots)
            } else {
                decompress::decompress(ispec, ospec, &opts2)
            }
        } else {
            compress::compress(ispec, ospec, &opts2)
        };
        match result {
            Ok(report) => {
                let _ = signal::kill(Pid::this(), Signal::SIGUSR2);
                report
            }
            Err(e) => thread_fatal(&in_label, &e),
        }
    });

    let mut wait_set = SigSet::empty();
    for s in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGUSR1, Signal::SIGUSR2] {
        wait_set.add(s);
    }

    loop {
        let sig = wait_set.wait().context("waiting for pipeline signal")?;
        match sig {
            Signal::SIGUSR2 => {
                let report = leader.join().expect("pipeline leader panicked");
                finish_report(opts, &report);
                if let (Some(inp), Some(outp)) = (&in_path, &out_path) {
                    copy_file_stats(inp, outp);
                    if !opts.keep {
                        fs::remove_file(inp).with_context(|| {
                            format!("removing input \"{}\"", inp.display())
                        })?;
                    }
                }
                return Ok(Outcome::Done);
            }
            Signal::SIGUSR1 => {
                // A sub-thread already printed its diagnostic.
                unlink_partial(&out_path);
                std::process::exit(1);
            }
            Signal::SIGINT | Signal::SIGTERM => {
                unlink_partial(&out_path);
                unsafe {
                    let _ = signal::signal(sig, SigHandler::SigDfl);
                }
                let mut one = SigSet::empty();
                one.add(sig);
                let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&one), None);
                let _ = signal::raise(sig);
                unreachable!("re-raised default-disposition signal");
            }
            _ => {}
        }
    }
}

fn unlink_partial(out_path: &Option<PathBuf>) {
    if let Some(p) = out_path {
        let _ = fs::remove_file(p);
    }
}

fn finish_report(opts: &Options, report: &Report) {
    if report.trailing_garbage_bits > 0 {
        warn(format_args!(
            "trailing garbage after end of last stream ignored ({} bits and beyond)",
            report.trailing_garbage_bits
        ));
    }
    if opts.verbose {
        let (small, large) = if opts.decompress {
            (report.in_bytes, report.out_bytes)
        } else {
            (report.out_bytes, report.in_bytes)
        };
        let ratio = if large > 0 {
            small as f64 * 100.0 / large as f64
        } else {
            0.0
        };
        eprintln!(
            "{}: {} bytes in, {} bytes out ({:.3}%)",
            program_name(),
            report.in_bytes,
            report.out_bytes,
            ratio
        );
    }
    if opts.print_cctrs {
        let names = ["workers", "muxer", "splitter"];
        eprintln!("{}: condvar counters:", program_name());
        for (name, (checks, waits)) in names.iter().zip(report.cctrs.iter()) {
            eprintln!(
                "{}: {:>9} tried to consume: {:>12}, stalled: {:>12}",
                program_name(),
                name,
                checks,
                waits
            );
        }
    }
}

/// Best-effort propagation of ownership, permission bits, and timestamps
/// from the input file to the finished output file.
fn copy_file_stats(src: &Path, dst: &Path) {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    let Ok(md) = fs::metadata(src) else { return };

    let _ = nix::unistd::chown(
        dst,
        Some(Uid::from_raw(md.uid())),
        Some(Gid::from_raw(md.gid())),
    );
    let _ = fs::set_permissions(dst, fs::Permissions::from_mode(md.mode() & 0o7777));
    let _ = filetime::set_file_times(
        dst,
        FileTime::from_last_access_time(&md),
        FileTime::from_last_modification_time(&md),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_name_has_a_default() {
        assert!(!program_name().is_empty());
    }

    #[test]
    fn copy_file_stats_transfers_mode_and_times() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"x").unwrap();
        fs::write(&dst, b"y").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        filetime::set_file_mtime(&src, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        copy_file_stats(&src, &dst);

        let md = fs::metadata(&dst).unwrap();
        assert_eq!(md.permissions().mode() & 0o7777, 0o640);
        assert_eq!(FileTime::from_last_modification_time(&md).unix_seconds(), 1_000_000);
    }
}
