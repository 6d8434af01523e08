//! Progress stream and cancellation

use crate::types::PipelineState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity; slow subscribers lag rather than block
pub const DEFAULT_CAPACITY: usize = 256;

/// What triggered an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProgressKind {
    /// Pipeline moved to a new stage
    StageChanged,
    /// One file was handled
    FileProcessed,
    /// A component finished (either way)
    ComponentFinished,
}

/// Snapshot emitted after every file and stage transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Trigger
    pub kind: ProgressKind,
    /// Full state at emission time
    pub state: PipelineState,
}

/// Broadcast sender for progress events
#[derive(Debug, Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    /// Create bus with `capacity` buffered events
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Emit a snapshot; having no subscribers is not an error
    pub fn emit(&self, kind: ProgressKind, state: &PipelineState) {
        let _ = self.tx.send(ProgressEvent {
            kind,
            state: state.clone(),
        });
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Cooperative abort flag shared between the caller and the pipeline
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create token in the running state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunId, Stage};

    #[tokio::test]
    async fn subscribers_receive_snapshots() {
        let bus = ProgressBus::new(8);
        let mut rx = bus.subscribe();
        let mut state = PipelineState::new(RunId::new());
        state.stage = Stage::Analysis;

        bus.emit(ProgressKind::StageChanged, &state);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ProgressKind::StageChanged);
        assert_eq!(event.state.stage, Stage::Analysis);
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = ProgressBus::default();
        bus.emit(ProgressKind::FileProcessed, &PipelineState::new(RunId::new()));
    }

    #[tokio::test]
    async fn lagging_subscriber_does_not_block() {
        let bus = ProgressBus::new(1);
        let mut rx = bus.subscribe();
        let state = PipelineState::new(RunId::new());
        for _ in 0..4 {
            bus.emit(ProgressKind::FileProcessed, &state);
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[test]
    fn cancel_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
