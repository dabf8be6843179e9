//! Buffered signal channels for live workflow runs.
//!
//! Channels are created on first use by either side, so a signal sent
//! before the workflow reaches its wait is buffered rather than lost.
//! Entries exist only while a run is live in this process; the engine
//! attaches a run before spawning it and detaches it when it ends.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

pub(crate) const SIGNAL_BUFFER_SIZE: usize = 16;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SignalSendError {
    /// No live run under this execution ID.
    NotAttached,
    /// The run's channel buffer is full.
    Overflow,
}

struct SignalChannel {
    tx: mpsc::Sender<JsonValue>,
    rx: Option<mpsc::Receiver<JsonValue>>,
}

impl SignalChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER_SIZE);
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
pub(crate) struct SignalHub {
    runs: Mutex<HashMap<String, HashMap<String, SignalChannel>>>,
}

impl SignalHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, execution_id: &str) {
        self.lock().entry(execution_id.to_string()).or_default();
    }

    pub(crate) fn detach(&self, execution_id: &str) {
        self.lock().remove(execution_id);
    }

    pub(crate) fn is_attached(&self, execution_id: &str) -> bool {
        self.lock().contains_key(execution_id)
    }

    pub(crate) fn send(
        &self,
        execution_id: &str,
        name: &str,
        payload: JsonValue,
    ) -> Result<(), SignalSendError> {
        let mut runs = self.lock();
        let channels = runs
            .get_mut(execution_id)
            .ok_or(SignalSendError::NotAttached)?;
        let channel = channels
            .entry(name.to_string())
            .or_insert_with(SignalChannel::new);

        match channel.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SignalSendError::Overflow),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SignalSendError::NotAttached),
        }
    }

    /// Hands the receiving half of a channel to the workflow side. Each
    /// channel has exactly one receiver; a second take returns `None`.
    pub(crate) fn take_receiver(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Option<mpsc::Receiver<JsonValue>> {
        let mut runs = self.lock();
        let channels = runs.get_mut(execution_id)?;
        let channel = channels
            .entry(name.to_string())
            .or_insert_with(SignalChannel::new);
        channel.rx.take()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, SignalChannel>>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_requires_attached_run() {
        let hub = SignalHub::new();
        assert_eq!(
            hub.send("wf-1", "upload-done", json!({})),
            Err(SignalSendError::NotAttached)
        );

        hub.attach("wf-1");
        assert_eq!(hub.send("wf-1", "upload-done", json!({})), Ok(()));

        hub.detach("wf-1");
        assert_eq!(
            hub.send("wf-1", "upload-done", json!({})),
            Err(SignalSendError::NotAttached)
        );
    }

    #[tokio::test]
    async fn test_signal_sent_before_wait_is_buffered() {
        let hub = SignalHub::new();
        hub.attach("wf-1");
        hub.send("wf-1", "decision", json!({"status": "approved"}))
            .unwrap();

        let mut rx = hub.take_receiver("wf-1", "decision").unwrap();
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["status"], "approved");
    }

    #[test]
    fn test_receiver_can_only_be_taken_once() {
        let hub = SignalHub::new();
        hub.attach("wf-1");
        assert!(hub.take_receiver("wf-1", "decision").is_some());
        assert!(hub.take_receiver("wf-1", "decision").is_none());
        // Another signal name is a separate channel.
        assert!(hub.take_receiver("wf-1", "other").is_some());
    }

    #[test]
    fn test_full_buffer_reports_overflow() {
        let hub = SignalHub::new();
        hub.attach("wf-1");
        for _ in 0..SIGNAL_BUFFER_SIZE {
            hub.send("wf-1", "decision", json!({})).unwrap();
        }
        assert_eq!(
            hub.send("wf-1", "decision", json!({})),
            Err(SignalSendError::Overflow)
        );
    }
}
