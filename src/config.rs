//! CLI argument parsing using clap

use std::ffi::OsString;
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser, ValueEnum};

use crate::run::{DEFAULT_BUFFER_BYTES, Outcome, RunOptions};
use crate::sampler::SamplingDomain;
use crate::slurm;

/// Sampling domain as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DomainArg {
    /// Unit square against the quarter circle
    Quarter,
    /// [-1, 1] square against the full circle
    Full,
}

impl From<DomainArg> for SamplingDomain {
    fn from(arg: DomainArg) -> Self {
        match arg {
            DomainArg::Quarter => SamplingDomain::QuarterCircleUnitSquare,
            DomainArg::Full => SamplingDomain::FullCircleCenteredSquare,
        }
    }
}

/// ferropi - Distributed Monte Carlo estimation of pi
#[derive(Parser, Debug)]
#[command(name = "ferropi")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Total number of samples, split across all workers
    ///
    /// Validated by the coordinator; a missing or malformed value prints
    /// usage and exits without running.
    #[arg(value_name = "SAMPLES")]
    pub samples: Option<String>,

    /// Number of workers (defaults to the SLURM allocation, then the core count)
    #[arg(short = 'n', long, env = "FERROPI_WORKERS", value_parser = clap::value_parser!(u32).range(1..))]
    pub workers: Option<u32>,

    /// Region points are drawn from
    #[arg(long, value_enum, default_value = "quarter")]
    pub domain: DomainArg,

    /// Base random seed (defaults to the current time)
    #[arg(long, env = "FERROPI_SEED")]
    pub seed: Option<u64>,

    /// Send buffer size per worker, in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_BYTES)]
    pub buffer_bytes: usize,

    /// Abort if any collective or the message drain stalls for this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Workers to launch.
    pub fn worker_count(&self) -> usize {
        self.workers
            .map(|n| n as usize)
            .unwrap_or_else(default_worker_count)
    }

    /// Timeout for blocking waits, if requested.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }

    /// Options the coordinator applies once the sample count validates.
    pub fn run_options(&self) -> RunOptions {
        let options = RunOptions::default()
            .with_domain(self.domain.into())
            .with_buffer_bytes(self.buffer_bytes);
        match self.seed {
            Some(seed) => options.with_seed(seed),
            None => options,
        }
    }
}

/// Worker count when none was given.
pub fn default_worker_count() -> usize {
    slurm::worker_hint()
        .or_else(|| thread::available_parallelism().ok().map(NonZeroUsize::get))
        .unwrap_or(1)
}

/// Why the command line did not produce a [`Cli`].
#[derive(Debug)]
pub enum ParseExit {
    /// Print this text to stdout and exit with status 0.
    Usage(String),
    /// `--help` or `--version`; clap renders the text and picks the exit.
    Help(clap::Error),
}

/// Parse `args`, folding every parse failure except help and version into
/// the usage text.
pub fn parse_from<I, T>(args: I) -> Result<Cli, ParseExit>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ParseExit::Help(e),
        _ => ParseExit::Usage(usage()),
    })
}

/// Usage text to print after a run, if the coordinator rejected its input.
pub fn rejection_usage(outcomes: &[Outcome]) -> Option<String> {
    match outcomes.first() {
        Some(Outcome::Rejected(_)) => Some(usage()),
        _ => None,
    }
}

/// Text printed when the sample count is missing or malformed.
pub fn usage() -> String {
    let usage = Cli::command().render_usage();
    format!(
        "Please provide the number of samples to use for the estimate:\n\n\t{usage}\n\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn samples_are_kept_raw() {
        let cli = Cli::try_parse_from(["ferropi", "not-a-number"]).unwrap();
        assert_eq!(cli.samples.as_deref(), Some("not-a-number"));

        let cli = Cli::try_parse_from(["ferropi"]).unwrap();
        assert_eq!(cli.samples, None);
    }

    #[test]
    fn options_are_mapped() {
        let cli = Cli::try_parse_from([
            "ferropi",
            "1000",
            "-n",
            "3",
            "--domain",
            "full",
            "--seed",
            "7",
            "--buffer-bytes",
            "2048",
            "--timeout",
            "30",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.worker_count(), 3);
        assert_eq!(cli.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cli.verbose, 2);

        let options = cli.run_options();
        assert_eq!(options.domain, SamplingDomain::FullCircleCenteredSquare);
        assert_eq!(options.seed, Some(7));
        assert_eq!(options.buffer_bytes, 2048);
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["ferropi", "10"]).unwrap();
        let options = cli.run_options();
        assert_eq!(options.domain, SamplingDomain::QuarterCircleUnitSquare);
        assert_eq!(options.buffer_bytes, DEFAULT_BUFFER_BYTES);
        assert_eq!(cli.timeout(), None);
    }

    #[test]
    fn zero_workers_is_a_parse_error() {
        assert!(Cli::try_parse_from(["ferropi", "10", "-n", "0"]).is_err());
    }

    #[test]
    fn bad_flags_fold_into_usage() {
        for args in [
            &["ferropi", "10", "--frobnicate"][..],
            &["ferropi", "10", "-n", "0"],
            &["ferropi", "-5"],
            &["ferropi", "10", "--domain", "square"],
        ] {
            match parse_from(args) {
                Err(ParseExit::Usage(text)) => assert_eq!(text, usage()),
                other => panic!("{args:?}: expected usage, got {other:?}"),
            }
        }
    }

    #[test]
    fn help_and_version_are_left_to_clap() {
        for (flag, kind) in [
            ("--help", ErrorKind::DisplayHelp),
            ("--version", ErrorKind::DisplayVersion),
        ] {
            match parse_from(["ferropi", flag]) {
                Err(ParseExit::Help(e)) => {
                    assert_eq!(e.kind(), kind);
                    assert_eq!(e.exit_code(), 0);
                }
                other => panic!("{flag}: expected help, got {other:?}"),
            }
        }
    }

    #[test]
    fn bad_sample_counts_still_parse() {
        // The coordinator rejects these after launch, not clap.
        for samples in ["0", "lots"] {
            let cli = parse_from(["ferropi", samples]).unwrap();
            assert_eq!(cli.samples.as_deref(), Some(samples));
        }
        assert!(parse_from(["ferropi"]).unwrap().samples.is_none());
    }

    #[test]
    fn rejected_runs_print_usage() {
        use crate::Universe;
        use crate::run::{InputError, Launch, Worker};

        for args in [&["ferropi", "0"][..], &["ferropi", "lots"], &["ferropi"]] {
            let cli = parse_from(args).unwrap();
            let launch = Launch::new(cli.samples.as_deref(), cli.run_options());
            let outcomes = Universe::new(2)
                .unwrap()
                .run(|world| Worker::new(world).run(&launch, &mut std::io::sink()))
                .unwrap();
            assert!(matches!(outcomes[0], Outcome::Rejected(_)), "{args:?}");
            assert_eq!(rejection_usage(&outcomes), Some(usage()));
        }

        assert_eq!(
            rejection_usage(&[Outcome::Rejected(InputError::Zero), Outcome::Skipped]),
            Some(usage())
        );
        assert_eq!(rejection_usage(&[Outcome::Finished]), None);
        assert_eq!(rejection_usage(&[]), None);
    }

    #[test]
    fn usage_names_the_positional() {
        assert!(usage().contains("SAMPLES"), "{}", usage());
    }
}
