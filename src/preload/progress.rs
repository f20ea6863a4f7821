//! Progress events emitted by a preload session

use futures::channel::mpsc;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressPhase {
    Start,
    Success,
    Error,
    /// Never started because the session was cancelled first
    Skip,
}

/// One progress record
///
/// `completed` and `failed` never decrease across the events of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    pub asset_id: String,
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    /// Display form of the load error for [`ProgressPhase::Error`]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// Finished assets, successful or not
    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }
}

/// Consumer of progress events
///
/// Called inline on the session driver, so it should return quickly.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(&ProgressEvent) + Send + Sync>);

impl ProgressSink {
    /// Sink calling `f` for every event
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Sink that forwards into an unbounded channel
    ///
    /// Dropping the receiver detaches the consumer; the session keeps running.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded();
        let sink = Self::from_fn(move |event| {
            let _ = tx.unbounded_send(event.clone());
        });
        (sink, rx)
    }

    /// Deliver one event
    pub fn emit(&self, event: &ProgressEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressSink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn event(phase: ProgressPhase) -> ProgressEvent {
        ProgressEvent {
            phase,
            asset_id: "a".to_string(),
            completed: 0,
            total: 1,
            failed: 0,
            error: None,
        }
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(&event(ProgressPhase::Start));
        drop(sink);
        let received: Vec<_> = futures::executor::block_on(async {
            let mut out = Vec::new();
            while let Some(e) = rx.next().await {
                out.push(e.phase);
            }
            out
        });
        assert_eq!(received, vec![ProgressPhase::Start]);
    }

    #[test]
    fn test_detached_receiver_is_tolerated() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.emit(&event(ProgressPhase::Success));
    }
}
