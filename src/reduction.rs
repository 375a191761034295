//! Reduction rounds that bring per-worker counts to the coordinator.
//!
//! Every worker calls each round exactly once and in the same order:
//! [`message_count`], then [`samples`], then [`timings`]. Each returns
//! `Some` on the coordinator and `None` everywhere else.

use tracing::debug;

use crate::ReduceOp;
use crate::channel::COORDINATOR;
use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::sampler::SampleResult;

/// Sum every worker's sent-message counter.
///
/// The coordinator uses the result as the number of messages to drain.
pub fn message_count(world: &Communicator, sent: u64) -> Result<Option<u64>> {
    let total = world.reduce_scalar(sent, ReduceOp::Sum, COORDINATOR)?;
    if let Some(total) = total {
        debug!(total, "message count reduced");
    }
    Ok(total)
}

/// Sum inside and total counts element-wise.
pub fn samples(world: &Communicator, result: SampleResult) -> Result<Option<SampleResult>> {
    let send = [result.inside_count, result.total_count];
    let mut recv = [0u64; 2];
    world.reduce(&send, &mut recv, ReduceOp::Sum, COORDINATOR)?;
    if world.rank() != COORDINATOR {
        return Ok(None);
    }
    debug!(inside = recv[0], total = recv[1], "sample counts reduced");
    Ok(Some(SampleResult {
        inside_count: recv[0],
        total_count: recv[1],
    }))
}

/// Fastest and slowest worker sampling times.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Timings {
    /// Shortest per-worker sampling time, in seconds.
    pub min_seconds: f64,
    /// Longest per-worker sampling time, in seconds.
    pub max_seconds: f64,
}

/// Reduce per-worker sampling time with `Min` and `Max`.
pub fn timings(world: &Communicator, seconds: f64) -> Result<Option<Timings>> {
    let max = world.reduce_scalar(seconds, ReduceOp::Max, COORDINATOR)?;
    let min = world.reduce_scalar(seconds, ReduceOp::Min, COORDINATOR)?;
    Ok(min.zip(max).map(|(min_seconds, max_seconds)| Timings {
        min_seconds,
        max_seconds,
    }))
}

/// The coordinator's final totals and estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateResult {
    /// Points inside the circle, across all workers.
    pub total_inside: u64,
    /// Points drawn, across all workers.
    pub total_samples: u64,
    /// `4 * total_inside / total_samples`.
    pub pi_estimate: f64,
}

impl AggregateResult {
    /// Build the estimate from reduced totals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCount`] when no samples were drawn.
    pub fn from_totals(totals: SampleResult) -> Result<Self> {
        if totals.total_count == 0 {
            return Err(Error::InvalidCount(0));
        }
        Ok(AggregateResult {
            total_inside: totals.inside_count,
            total_samples: totals.total_count,
            pi_estimate: 4.0 * totals.inside_count as f64 / totals.total_count as f64,
        })
    }

    /// Distance from the true value of π.
    pub fn abs_error(&self) -> f64 {
        (self.pi_estimate - std::f64::consts::PI).abs()
    }

    /// [`abs_error`](Self::abs_error) as a percentage of π.
    pub fn relative_error_percent(&self) -> f64 {
        self.abs_error() / std::f64::consts::PI * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Universe;

    #[test]
    fn estimate_from_totals() {
        let aggregate = AggregateResult::from_totals(SampleResult {
            inside_count: 785,
            total_count: 1000,
        })
        .unwrap();
        assert_eq!(aggregate.total_inside, 785);
        assert_eq!(aggregate.total_samples, 1000);
        assert!((aggregate.pi_estimate - 3.14).abs() < 1e-12);
        assert!((aggregate.abs_error() - (std::f64::consts::PI - 3.14)).abs() < 1e-12);
    }

    #[test]
    fn zero_samples_has_no_estimate() {
        let err = AggregateResult::from_totals(SampleResult::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidCount(0)));
    }

    #[test]
    fn rounds_only_resolve_on_coordinator() {
        let results = Universe::new(3)
            .unwrap()
            .run(|world| {
                let rank = world.rank() as u64;
                let count = message_count(world, rank + 1)?;
                let totals = samples(
                    world,
                    SampleResult {
                        inside_count: rank,
                        total_count: 10,
                    },
                )?;
                let times = timings(world, 0.5 + rank as f64)?;
                Ok((count, totals, times))
            })
            .unwrap();

        let (count, totals, times) = results[0];
        assert_eq!(count, Some(6));
        assert_eq!(
            totals,
            Some(SampleResult {
                inside_count: 3,
                total_count: 30
            })
        );
        assert_eq!(
            times,
            Some(Timings {
                min_seconds: 0.5,
                max_seconds: 2.5
            })
        );
        for other in &results[1..] {
            assert_eq!(*other, (None, None, None));
        }
    }
}
