//! `gpucap-record` serializes commands produced concurrently by many interception threads into
//! strict trace-key order.
//!
//! Keys come from a process-wide [`TraceKeyAllocator`], so they are unique and reflect the order in
//! which the application issued its calls, but commands reach the recorder in whatever order the
//! producing threads finish. The [`RecordingScheduler`] owns a single consumer thread running an
//! [`OrderingState`]: it buffers early arrivals, crosses keys that producers declared irrelevant
//! (`skip`), fires frame boundaries after their key is delivered, and hands everything to a
//! [`CommandSink`] in order.

mod config;
mod error;
mod key;
mod ordering;
mod scheduler;
mod sink;
mod stats;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use key::TraceKeyAllocator;
pub use ordering::{OrderingState, KEY_LIMIT};
pub use scheduler::{RecordingScheduler, SchedulerHandle};
pub use sink::{CommandSink, SinkEvent, VecSink};
pub use stats::{SchedulerStats, SchedulerStatsSnapshot};
