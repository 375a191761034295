//! Per-worker run lifecycle.
//!
//! Every rank executes the same [`Worker::run`]; the coordinator's extra
//! duties (validating input, draining progress messages, reporting) are
//! steps gated on its [`Role`]. The sequence is:
//!
//! 1. coordinator validates the sample count
//! 2. go/no-go flag broadcast; everyone stops on no-go
//! 3. run parameters broadcast
//! 4. attach message channel, announce share, sample, announce result
//! 5. reduce message counts; coordinator drains that many messages
//! 6. reduce sample counts and timings; coordinator reports
//! 7. detach message channel

use std::fmt;
use std::io::Write;
use std::time::Instant;

use tracing::{debug, info};

use crate::channel::{self, COORDINATOR, MessageChannel};
use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::partition;
use crate::reduction::{self, AggregateResult, Timings};
use crate::sampler::{self, Sampler, SamplingDomain};

/// Default send buffer size per worker, in bytes.
pub const DEFAULT_BUFFER_BYTES: usize = 10_000;

/// Why the coordinator refused to start a run.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// No sample count was given.
    #[error("missing sample count")]
    Missing,
    /// The sample count is not a non-negative integer.
    #[error("invalid sample count {0:?}")]
    Malformed(String),
    /// A zero sample count leaves nothing to estimate from.
    #[error("sample count must be greater than zero")]
    Zero,
}

/// Parse and check the sample count argument.
pub fn validate_total(arg: Option<&str>) -> std::result::Result<u64, InputError> {
    let arg = arg.ok_or(InputError::Missing)?;
    let total = arg
        .trim()
        .parse::<u64>()
        .map_err(|_| InputError::Malformed(arg.to_string()))?;
    if total == 0 {
        return Err(InputError::Zero);
    }
    Ok(total)
}

/// Settings the coordinator broadcasts alongside the sample count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Where points are drawn.
    pub domain: SamplingDomain,
    /// Base seed; wall-clock seconds when unset.
    pub seed: Option<u64>,
    /// Send buffer capacity per worker, in bytes.
    pub buffer_bytes: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            domain: SamplingDomain::default(),
            seed: None,
            buffer_bytes: DEFAULT_BUFFER_BYTES,
        }
    }
}

impl RunOptions {
    /// Use `domain` for sampling.
    pub fn with_domain(mut self, domain: SamplingDomain) -> Self {
        self.domain = domain;
        self
    }

    /// Fix the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the per-worker send buffer size.
    pub fn with_buffer_bytes(mut self, buffer_bytes: usize) -> Self {
        self.buffer_bytes = buffer_bytes;
        self
    }
}

/// The coordinator's input. Other ranks never look at it.
#[derive(Debug, Clone)]
pub struct Launch<'a> {
    /// Raw sample count argument.
    pub total_arg: Option<&'a str>,
    /// Settings applied once the sample count is valid.
    pub options: RunOptions,
}

impl<'a> Launch<'a> {
    /// Bundle the raw argument with its options.
    pub fn new(total_arg: Option<&'a str>, options: RunOptions) -> Self {
        Launch { total_arg, options }
    }
}

/// Run configuration every worker holds once it has been broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParameters {
    /// Samples across all workers.
    pub total_samples: u64,
    /// Where points are drawn.
    pub domain: SamplingDomain,
    /// Seed that [`sampler::seed_for_rank`] offsets per rank.
    pub seed_base: u64,
    /// Send buffer capacity per worker, in bytes.
    pub buffer_bytes: usize,
}

impl RunParameters {
    fn resolve(total_samples: u64, options: RunOptions) -> Self {
        RunParameters {
            total_samples,
            domain: options.domain,
            seed_base: options.seed.unwrap_or_else(sampler::wall_clock_seed),
            buffer_bytes: options.buffer_bytes,
        }
    }

    fn encode(&self) -> [u64; 4] {
        [
            self.total_samples,
            self.domain.code(),
            self.seed_base,
            self.buffer_bytes as u64,
        ]
    }

    fn decode(words: [u64; 4]) -> Result<Self> {
        let [total_samples, domain, seed_base, buffer_bytes] = words;
        let domain = SamplingDomain::from_code(domain)
            .ok_or_else(|| Error::Internal(format!("unknown sampling domain code {domain}")))?;
        let buffer_bytes = usize::try_from(buffer_bytes)
            .map_err(|_| Error::Internal(format!("buffer size {buffer_bytes} overflows")))?;
        Ok(RunParameters {
            total_samples,
            domain,
            seed_base,
            buffer_bytes,
        })
    }
}

/// Whether a worker carries the coordinator's extra duties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Rank 0: validates, drains, reports.
    Coordinator,
    /// Every other rank.
    Participant,
}

impl Role {
    /// Role held by `rank`.
    pub fn of(rank: i32) -> Self {
        if rank == COORDINATOR {
            Role::Coordinator
        } else {
            Role::Participant
        }
    }

    /// Whether this is the coordinator.
    pub fn is_coordinator(self) -> bool {
        self == Role::Coordinator
    }
}

/// The coordinator's final report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    /// Number of workers that took part.
    pub workers: i32,
    /// Reduced totals and the estimate.
    pub aggregate: AggregateResult,
    /// Fastest and slowest sampling times.
    pub timings: Timings,
}

impl Report {
    /// Samples per second, measured against the slowest worker.
    pub fn throughput(&self) -> Option<f64> {
        (self.timings.max_seconds > 0.0)
            .then(|| self.aggregate.total_samples as f64 / self.timings.max_seconds)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let aggregate = &self.aggregate;
        writeln!(f)?;
        writeln!(f, "Results:")?;
        writeln!(f, "--------")?;
        writeln!(f, "  Points inside circle: {}", aggregate.total_inside)?;
        writeln!(f, "  Total points sampled: {}", aggregate.total_samples)?;
        writeln!(f)?;
        writeln!(f, "  Estimated π: {:.10}", aggregate.pi_estimate)?;
        writeln!(f, "  Actual π:    {:.10}", std::f64::consts::PI)?;
        writeln!(
            f,
            "  Error:       {:.10} ({:.6}%)",
            aggregate.abs_error(),
            aggregate.relative_error_percent()
        )?;
        writeln!(f)?;
        writeln!(f, "Performance:")?;
        writeln!(f, "------------")?;
        writeln!(f, "  Workers: {}", self.workers)?;
        writeln!(f, "  Min sampling time: {:.4}s", self.timings.min_seconds)?;
        writeln!(f, "  Max sampling time: {:.4}s", self.timings.max_seconds)?;
        match self.throughput() {
            Some(rate) => writeln!(f, "  Samples/second: {rate:.2e}"),
            None => writeln!(f, "  Samples/second: n/a"),
        }
    }
}

/// How a worker's run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The coordinator rejected its input; nothing was run.
    Rejected(InputError),
    /// A participant stopped because the coordinator rejected its input.
    Skipped,
    /// A participant finished its share.
    Finished,
    /// The coordinator finished and reported.
    Reported(Report),
}

/// One rank's view of the run.
pub struct Worker<'c> {
    world: &'c Communicator,
    role: Role,
}

impl<'c> Worker<'c> {
    /// Wrap `world`; the role follows from its rank.
    pub fn new(world: &'c Communicator) -> Self {
        Worker {
            world,
            role: Role::of(world.rank()),
        }
    }

    /// This worker's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Execute the whole lifecycle.
    ///
    /// Only the coordinator reads `launch` and writes to `out`.
    pub fn run(&self, launch: &Launch<'_>, out: &mut dyn Write) -> Result<Outcome> {
        let validated = if self.role.is_coordinator() {
            Some(self.validate(launch, out)?)
        } else {
            None
        };

        let go = self.world.broadcast_scalar(
            u8::from(matches!(validated, Some(Ok(_)))),
            COORDINATOR,
        )?;
        if go == 0 {
            debug!(rank = self.world.rank(), "no-go received, stopping");
            return Ok(match validated {
                Some(Err(reason)) => Outcome::Rejected(reason),
                _ => Outcome::Skipped,
            });
        }

        let mut words = match validated {
            Some(Ok(params)) => params.encode(),
            _ => [0; 4],
        };
        self.world.broadcast(&mut words, COORDINATOR)?;
        let params = RunParameters::decode(words)?;

        match self.execute(&params, out)? {
            Some(report) => Ok(Outcome::Reported(report)),
            None => Ok(Outcome::Finished),
        }
    }

    fn validate(
        &self,
        launch: &Launch<'_>,
        out: &mut dyn Write,
    ) -> Result<std::result::Result<RunParameters, InputError>> {
        let total = match validate_total(launch.total_arg) {
            Ok(total) => total,
            Err(reason) => {
                info!(%reason, "rejecting run");
                return Ok(Err(reason));
            }
        };
        let workers = self.world.size();
        writeln!(out, "- Workers: {workers}")?;
        writeln!(
            out,
            "- Each worker will compute {} samples of a total of {}.",
            partition::base_share(total, workers)?,
            total
        )?;
        Ok(Ok(RunParameters::resolve(total, launch.options)))
    }

    fn execute(&self, params: &RunParameters, out: &mut dyn Write) -> Result<Option<Report>> {
        let rank = self.world.rank();
        let workers = self.world.size();
        let share = partition::share(params.total_samples, workers, rank)?;

        let mut channel = MessageChannel::attach(self.world, params.buffer_bytes)?;
        channel.send(format!("- Worker {rank} will compute {share} samples"))?;

        let seed = sampler::seed_for_rank(params.seed_base, rank);
        let started = Instant::now();
        let result = Sampler::new(seed, params.domain).sample(share);
        let elapsed = started.elapsed().as_secs_f64();
        debug!(rank, seed, share, elapsed, "sampling finished");

        channel.send(format!(
            "Samples from rank {rank}: inside={} total={}",
            result.inside_count, result.total_count
        ))?;

        if let Some(expected) = reduction::message_count(self.world, channel.sent())? {
            channel::drain(self.world, expected, |message| {
                writeln!(out, "{}", message.text)?;
                Ok(())
            })?;
        }

        let totals = reduction::samples(self.world, result)?;
        let timings = reduction::timings(self.world, elapsed)?;

        let report = match totals.zip(timings) {
            Some((totals, timings)) => {
                let report = Report {
                    workers,
                    aggregate: AggregateResult::from_totals(totals)?,
                    timings,
                };
                write!(out, "{report}")?;
                out.flush()?;
                info!(estimate = report.aggregate.pi_estimate, "run complete");
                Some(report)
            }
            None => None,
        };

        channel.detach()?;
        Ok(report)
    }
}
