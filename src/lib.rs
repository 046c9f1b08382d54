//! GPU command capture core.
//!
//! [`CaptureContext`] bundles the services an interception layer needs while it records a trace:
//! address and descriptor-handle virtualization from [`gpucap_addr`], and the ordered recorder from
//! [`gpucap_record`]. The context is created once per capture and its pieces are shared with the
//! intercepting threads through `Arc`s and cloned [`SchedulerHandle`]s.

mod config;

use std::sync::Arc;

use gpucap_record::{
    CommandSink, RecordingScheduler, SchedulerError, SchedulerHandle, SchedulerStatsSnapshot,
    TraceKeyAllocator,
};
use tracing::info;

pub use config::CaptureConfig;
pub use gpucap_addr as addr;
pub use gpucap_addr::{AddressRegistry, DescriptorHandleRegistry};
pub use gpucap_record as record;

pub struct CaptureContext<P, S>
where
    P: Send + 'static,
    S: CommandSink<P> + Send + 'static,
{
    addresses: Arc<AddressRegistry>,
    descriptors: Arc<DescriptorHandleRegistry>,
    keys: Arc<TraceKeyAllocator>,
    scheduler: RecordingScheduler<P, S>,
}

impl<P, S> CaptureContext<P, S>
where
    P: Send + 'static,
    S: CommandSink<P> + Send + 'static,
{
    /// Start a capture writing into `sink`.
    ///
    /// The key allocator starts at `config.scheduler.first_key` so the first allocated key is the
    /// first one the recorder waits for.
    pub fn new(sink: S, config: CaptureConfig) -> Result<Self, SchedulerError> {
        let keys = Arc::new(TraceKeyAllocator::starting_at(config.scheduler.first_key));
        let scheduler = RecordingScheduler::new(sink, config.scheduler)?;
        info!(first_key = keys.peek(), "capture started");
        Ok(Self {
            addresses: Arc::new(AddressRegistry::new()),
            descriptors: Arc::new(DescriptorHandleRegistry::new()),
            keys,
            scheduler,
        })
    }

    pub fn addresses(&self) -> &Arc<AddressRegistry> {
        &self.addresses
    }

    pub fn descriptors(&self) -> &Arc<DescriptorHandleRegistry> {
        &self.descriptors
    }

    pub fn keys(&self) -> &Arc<TraceKeyAllocator> {
        &self.keys
    }

    /// Allocate the trace key for an intercepted call. Every key taken must later be recorded or
    /// skipped, or the recorder stalls behind it.
    pub fn begin_command(&self) -> u64 {
        self.keys.next_key()
    }

    pub fn handle(&self) -> SchedulerHandle<P> {
        self.scheduler.handle()
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.scheduler.stats()
    }

    /// Drain the recorder and return the sink.
    pub fn finish(self) -> Result<S, SchedulerError> {
        let next_key = self.keys.peek();
        let sink = self.scheduler.finish()?;
        info!(
            next_key,
            resources = self.addresses.len(),
            descriptor_heaps = self.descriptors.len(),
            "capture finished"
        );
        Ok(sink)
    }
}
