//! loadgrid-engine — load-generation engines behind the `LoadEngine` trait.
//!
//! # Architecture
//!
//! ```text
//! WorkerPoolEngine
//!   ├── WorkerSlot per virtual user (JoinHandle + watch shutdown)
//!   │   └── loop { Workload::execute() → RequestStats; sleep(WaitTime) }
//!   ├── ramp task (when spawn_rate < |delta|)
//!   └── RequestStats (sliding-window rps, cumulative mean latency)
//!
//! SimulatedEngine
//!   └── rps = min(cap, workers × rps_per_worker), with fault injection
//! ```
//!
//! Neither engine speaks a wire protocol. The worker pool runs a synthetic
//! [`Workload`] that models latency and failures only.

pub mod pool;
pub mod sim;
pub mod stats;
pub mod workload;

pub use pool::WorkerPoolEngine;
pub use sim::SimulatedEngine;
pub use stats::RequestStats;
pub use workload::{RequestOutcome, WaitTime, Workload};
