//! # ferropi
//!
//! Distributed Monte Carlo estimation of π over an in-process, MPI-shaped
//! message-passing runtime.
//!
//! The crate has two layers:
//!
//! - **Runtime**: a [`Universe`] of worker threads, each holding a
//!   [`Communicator`] with barrier, broadcast, reduce, buffered send,
//!   probe/iprobe and receive.
//! - **Estimator**: the per-worker lifecycle in [`run`] that validates input
//!   on the coordinator, partitions the samples ([`partition`]), samples
//!   ([`sampler`]), streams progress text to the coordinator ([`channel`]),
//!   and reduces message counts and sample counts ([`reduction`]) before the
//!   coordinator reports.
//!
//! ## Quick Start
//!
//! ```
//! use ferropi::run::{Launch, Outcome, RunOptions, Worker};
//! use ferropi::Universe;
//!
//! let options = RunOptions::default().with_seed(7);
//! let launch = Launch::new(Some("100000"), options);
//!
//! let outcomes = Universe::new(4)?.run(|world| {
//!     Worker::new(world).run(&launch, &mut std::io::sink())
//! })?;
//!
//! let Outcome::Reported(report) = &outcomes[0] else {
//!     panic!("coordinator should report");
//! };
//! assert_eq!(report.aggregate.total_samples, 100_000);
//! # Ok::<(), ferropi::Error>(())
//! ```
//!
//! ## Supported Types
//!
//! Collectives are generic over [`Datatype`]:
//! `f32`, `f64`, `i32`, `i64`, `u8`, `u32`, `u64`

#![warn(missing_docs)]
#![warn(clippy::all)]
// Allow certain pedantic lints
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]

mod buffer;
mod comm;
mod datatype;
mod error;
mod fabric;
mod request;
mod status;
mod universe;

pub mod channel;
pub mod config;
pub mod logging;
pub mod partition;
pub mod reduction;
pub mod run;
pub mod sampler;
pub mod slurm;

pub use buffer::{BSEND_OVERHEAD, SendBuffer};
pub use comm::Communicator;
pub use datatype::{Datatype, DatatypeTag};
pub use error::{Error, Result};
pub use status::Status;
pub use universe::Universe;

/// Wildcard source rank for probe and receive.
pub const ANY_SOURCE: i32 = -1;

/// Wildcard tag for probe and receive.
pub const ANY_TAG: i32 = -1;

/// Reduction operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReduceOp {
    /// Sum of values
    Sum = 0,
    /// Maximum value
    Max = 1,
    /// Minimum value
    Min = 2,
    /// Product of values
    Prod = 3,
}
