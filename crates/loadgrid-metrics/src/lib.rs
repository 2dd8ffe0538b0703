//! loadgrid-metrics — telemetry in and telemetry out.
//!
//! Reads samples from the load-generation engine, optionally smooths the
//! measured throughput, and consumes the stream of tick records the
//! control loop emits.
//!
//! # Architecture
//!
//! ```text
//! MetricsSampler
//!   └── pull() → Sample   (read-only against the engine)
//!
//! MovingAverage
//!   └── push(rps) → mean of the last N readings
//!
//! Recorder  (independent task, reads an mpsc::Receiver<TickRecord>)
//!   ├── bounded history
//!   ├── JSON-lines file (optional)
//!   ├── Prometheus textfile (optional) ← render_prometheus()
//!   └── periodic stats line, RecorderSummary at close
//! ```

pub mod prometheus;
pub mod recorder;
pub mod sampler;
pub mod smoothing;

pub use prometheus::render_prometheus;
pub use recorder::{Recorder, RecorderConfig, RecorderSummary};
pub use sampler::MetricsSampler;
pub use smoothing::MovingAverage;
