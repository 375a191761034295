//! Bootstrapping a group of workers.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info_span};

use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::fabric::Fabric;

/// A fixed-size group of workers sharing one fabric.
///
/// [`run`](Self::run) spawns one thread per rank, hands each its
/// [`Communicator`], and joins them all. If any worker fails or panics the
/// fabric is aborted, so peers blocked in a collective or receive return
/// [`Error::Aborted`] instead of hanging.
///
/// # Example
///
/// ```
/// use ferropi::Universe;
///
/// let ranks = Universe::new(3)?.run(|world| Ok(world.rank()))?;
/// assert_eq!(ranks, vec![0, 1, 2]);
/// # Ok::<(), ferropi::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Universe {
    size: i32,
    timeout: Option<Duration>,
}

impl Universe {
    /// Create a universe of `size` workers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCount`] if `size` is zero or does not fit a rank.
    pub fn new(size: usize) -> Result<Self> {
        let size = i32::try_from(size)
            .ok()
            .filter(|&size| size > 0)
            .ok_or(Error::InvalidCount(size as i64))?;
        Ok(Universe {
            size,
            timeout: None,
        })
    }

    /// Bound every blocking wait (collectives, probe, receive, drain) by
    /// `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of workers.
    pub fn size(&self) -> i32 {
        self.size
    }

    /// Run `body` on every rank and collect the per-rank results in rank order.
    ///
    /// # Errors
    ///
    /// Returns the first root-cause error raised by any worker; errors that
    /// merely report the resulting abort are only returned if nothing else is
    /// available.
    pub fn run<F, R>(&self, body: F) -> Result<Vec<R>>
    where
        F: Fn(&Communicator) -> Result<R> + Sync,
        R: Send,
    {
        let fabric = Arc::new(Fabric::new(self.size, self.timeout));
        let body = &body;

        let outcomes: Vec<Result<R>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.size as usize);
            for rank in 0..self.size {
                let shared = Arc::clone(&fabric);
                let spawned = thread::Builder::new()
                    .name(format!("worker-{rank}"))
                    .spawn_scoped(scope, move || {
                        let _span = info_span!("worker", rank).entered();
                        let _guard = AbortOnPanic {
                            fabric: &shared,
                            rank,
                        };
                        let world = Communicator::new(Arc::clone(&shared), rank);
                        let result = body(&world);
                        if let Err(err) = &result {
                            if !err.is_secondary() {
                                shared.abort(format!("rank {rank} failed: {err}"));
                            }
                        }
                        result
                    });
                if let Err(err) = &spawned {
                    fabric.abort(format!("could not spawn rank {rank}: {err}"));
                }
                handles.push((rank, spawned));
            }
            handles
                .into_iter()
                .map(|(rank, spawned)| match spawned {
                    Ok(handle) => handle.join().unwrap_or(Err(Error::WorkerPanicked(rank))),
                    Err(err) => Err(Error::Io(err)),
                })
                .collect()
        });

        debug!(size = self.size, "universe finished");
        collect(outcomes)
    }
}

/// Pick per-rank values, or the most informative error.
fn collect<R>(outcomes: Vec<Result<R>>) -> Result<Vec<R>> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut secondary = None;
    for outcome in outcomes {
        match outcome {
            Ok(value) => values.push(value),
            Err(err) if err.is_secondary() => {
                secondary.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    match secondary {
        Some(err) => Err(err),
        None => Ok(values),
    }
}

struct AbortOnPanic<'a> {
    fabric: &'a Fabric,
    rank: i32,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.fabric.abort(format!("rank {} panicked", self.rank));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(Universe::new(0), Err(Error::InvalidCount(0))));
    }

    #[test]
    fn timeout_is_carried_to_communicators() {
        let universe = Universe::new(2)
            .unwrap()
            .with_timeout(Duration::from_secs(5));
        let timeouts = universe.run(|world| Ok(world.timeout())).unwrap();
        assert_eq!(timeouts, vec![Some(Duration::from_secs(5)); 2]);
    }

    #[test]
    fn collect_prefers_root_cause() {
        let outcomes: Vec<Result<()>> = vec![
            Err(Error::Aborted("rank 1 failed".into())),
            Err(Error::InvalidRank(9)),
        ];
        assert!(matches!(collect(outcomes), Err(Error::InvalidRank(9))));
    }

    #[test]
    fn collect_falls_back_to_secondary() {
        let outcomes: Vec<Result<()>> = vec![Ok(()), Err(Error::Aborted("x".into()))];
        assert!(matches!(collect(outcomes), Err(Error::Aborted(_))));
    }
}
