//! Step delivery to the caller.
//!
//! A run reports progress through a [`StepEmitter`]: either a closure the
//! caller owns or an unbounded channel whose receiver is handed out as a
//! stream (for SSE forwarding).

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::types::AgentStep;

/// Receiving half of [`StepEmitter::channel`].
pub type StepStream = UnboundedReceiverStream<AgentStep>;

/// In-order, synchronous sink for [`AgentStep`]s.
pub struct StepEmitter<'a> {
    sink: Box<dyn FnMut(AgentStep) + Send + 'a>,
    emitted: usize,
}

impl<'a> StepEmitter<'a> {
    /// Deliver steps to a closure.
    pub fn new(sink: impl FnMut(AgentStep) + Send + 'a) -> Self {
        Self {
            sink: Box::new(sink),
            emitted: 0,
        }
    }

    /// Emitter that drops everything.
    #[must_use]
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    /// Deliver one step.
    pub fn emit(&mut self, step: AgentStep) {
        tracing::trace!(kind = step.kind(), seq = self.emitted, "step");
        self.emitted += 1;
        (self.sink)(step);
    }

    /// Number of steps delivered so far.
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }
}

impl StepEmitter<'static> {
    /// Emitter backed by an unbounded channel.
    ///
    /// Sending never blocks the run. Once the receiver is dropped further
    /// steps are discarded.
    #[must_use]
    pub fn channel() -> (Self, StepStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Self::new(move |step: AgentStep| {
            if tx.send(step).is_err() {
                tracing::debug!("step receiver dropped");
            }
        });
        (emitter, UnboundedReceiverStream::new(rx))
    }
}

impl std::fmt::Debug for StepEmitter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEmitter")
            .field("emitted", &self.emitted)
            .finish_non_exhaustive()
    }
}
