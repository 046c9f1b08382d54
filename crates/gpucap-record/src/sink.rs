/// Downstream consumer of ordered commands (typically a trace file writer).
///
/// Called only from the scheduler's consumer thread, in strictly increasing key order.
pub trait CommandSink<P> {
    fn deliver(&mut self, key: u64, payload: P);

    /// The frame ended with the most recently delivered command.
    fn on_frame_end(&mut self);
}

impl<P, S: CommandSink<P> + ?Sized> CommandSink<P> for &mut S {
    fn deliver(&mut self, key: u64, payload: P) {
        (**self).deliver(key, payload);
    }

    fn on_frame_end(&mut self) {
        (**self).on_frame_end();
    }
}

impl<P, S: CommandSink<P> + ?Sized> CommandSink<P> for Box<S> {
    fn deliver(&mut self, key: u64, payload: P) {
        (**self).deliver(key, payload);
    }

    fn on_frame_end(&mut self) {
        (**self).on_frame_end();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent<P> {
    Command { key: u64, payload: P },
    FrameEnd,
}

/// In-memory sink that keeps every event, for tests and offline tooling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VecSink<P> {
    pub events: Vec<SinkEvent<P>>,
}

impl<P> Default for VecSink<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> VecSink<P> {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Delivered keys, in delivery order.
    pub fn keys(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Command { key, .. } => Some(*key),
                SinkEvent::FrameEnd => None,
            })
            .collect()
    }

    pub fn payloads(&self) -> Vec<&P> {
        self.events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Command { payload, .. } => Some(payload),
                SinkEvent::FrameEnd => None,
            })
            .collect()
    }

    pub fn frame_ends(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, SinkEvent::FrameEnd))
            .count()
    }
}

impl<P> CommandSink<P> for VecSink<P> {
    fn deliver(&mut self, key: u64, payload: P) {
        self.events.push(SinkEvent::Command { key, payload });
    }

    fn on_frame_end(&mut self) {
        self.events.push(SinkEvent::FrameEnd);
    }
}
