//! Per-run workflow context.
//!
//! A [`WorkflowContext`] is handed to a workflow body when the engine
//! spawns or re-drives a run. Activities execute through [`step`]
//! variants that memoize their result in the run's execution record, so a
//! re-driven run replays past the work that already happened instead of
//! repeating it. Received signals are recorded the same way.
//!
//! [`step`]: WorkflowContext::step

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch, Semaphore};

use crate::error::{ActivityError, WorkflowError};
use crate::executions::{checkpoint_map, ExecutionRecord, ExecutionStore};
use crate::signals::SignalHub;

/// Retry schedule for activity attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Defaults for short in-process activities.
    pub const fn local() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(60),
            max_attempts: 3,
        }
    }

    /// Single attempt, no retries.
    pub const fn none() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            max_interval: Duration::ZERO,
            max_attempts: 1,
        }
    }

    /// Backoff delay after the given attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_interval.as_secs_f64()))
    }
}

/// Options for long-running activities.
#[derive(Debug, Clone, Copy)]
pub struct RemoteActivityOptions {
    /// Upper bound on a single attempt.
    pub start_to_close: Duration,
    pub retry: RetryPolicy,
    /// Whether an attempt that hits `start_to_close` may be retried.
    pub retry_on_timeout: bool,
}

/// Liveness marker handle for long-running activities.
#[derive(Clone)]
pub struct Heartbeat {
    store: Arc<dyn ExecutionStore>,
    db_id: i64,
}

impl Heartbeat {
    pub(crate) fn new(store: Arc<dyn ExecutionStore>, db_id: i64) -> Self {
        Self { store, db_id }
    }

    /// Best-effort; a failed heartbeat never fails the activity.
    pub async fn beat(&self) {
        if let Err(err) = self.store.heartbeat(self.db_id).await {
            tracing::warn!(error = %err, "failed to record activity heartbeat");
        }
    }
}

pub struct WorkflowContext {
    execution_id: String,
    db_id: i64,
    store: Arc<dyn ExecutionStore>,
    signals: Arc<SignalHub>,
    permits: Arc<Semaphore>,
    cancel: watch::Receiver<bool>,
    checkpoints: HashMap<String, JsonValue>,
    receivers: HashMap<String, mpsc::Receiver<JsonValue>>,
}

impl WorkflowContext {
    pub(crate) fn new(
        record: &ExecutionRecord,
        store: Arc<dyn ExecutionStore>,
        signals: Arc<SignalHub>,
        permits: Arc<Semaphore>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            execution_id: record.execution_id.clone(),
            db_id: record.db_id,
            store,
            signals,
            permits,
            cancel,
            checkpoints: checkpoint_map(record),
            receivers: HashMap::new(),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// A cancellation watch for activity bodies. Flips to `true` when the
    /// engine shuts down.
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    /// Heartbeat handle for activity bodies.
    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat::new(self.store.clone(), self.db_id)
    }

    /// Runs a short in-process activity with the default retry policy.
    pub async fn step<T, F, Fut>(&mut self, name: &str, f: F) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        self.run_step(name, RetryPolicy::local(), None, f).await
    }

    /// Runs a short in-process activity with an explicit retry policy.
    pub async fn step_with_retry<T, F, Fut>(
        &mut self,
        name: &str,
        policy: RetryPolicy,
        f: F,
    ) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        self.run_step(name, policy, None, f).await
    }

    /// Runs a long activity with a per-attempt deadline.
    pub async fn step_remote<T, F, Fut>(
        &mut self,
        name: &str,
        opts: RemoteActivityOptions,
        f: F,
    ) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        self.run_step(
            name,
            opts.retry,
            Some((opts.start_to_close, opts.retry_on_timeout)),
            f,
        )
        .await
    }

    async fn run_step<T, F, Fut>(
        &mut self,
        name: &str,
        policy: RetryPolicy,
        attempt_deadline: Option<(Duration, bool)>,
        mut f: F,
    ) -> Result<T, WorkflowError>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        if let Some(recorded) = self.checkpoints.get(name) {
            return decode_recorded(name, recorded.clone());
        }

        let mut attempt: u32 = 1;
        loop {
            let permit = match self.permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Err(WorkflowError::Canceled),
            };

            let outcome = match attempt_deadline {
                Some((limit, retry_on_timeout)) => {
                    match tokio::time::timeout(limit, f()).await {
                        Ok(result) => result,
                        Err(_) if retry_on_timeout => Err(ActivityError::Retryable(format!(
                            "attempt timed out after {}s",
                            limit.as_secs()
                        ))),
                        Err(_) => Err(ActivityError::NonRetryable(format!(
                            "attempt timed out after {}s",
                            limit.as_secs()
                        ))),
                    }
                }
                None => f().await,
            };
            drop(permit);

            match outcome {
                Ok(value) => {
                    let recorded = serde_json::to_value(&value).map_err(|err| {
                        WorkflowError::Failed(format!("step {}: encode result: {}", name, err))
                    })?;
                    self.record(name, recorded).await?;
                    return Ok(value);
                }
                Err(ActivityError::Canceled) => return Err(WorkflowError::Canceled),
                Err(ActivityError::NonRetryable(msg)) => {
                    return Err(WorkflowError::Failed(format!("step {}: {}", name, msg)));
                }
                Err(ActivityError::Retryable(msg)) => {
                    if attempt >= policy.max_attempts {
                        return Err(WorkflowError::Failed(format!("step {}: {}", name, msg)));
                    }
                    tracing::warn!(
                        step = name,
                        attempt,
                        error = %msg,
                        "activity attempt failed, retrying"
                    );

                    let delay = policy.backoff(attempt);
                    let mut cancel = self.cancel.clone();
                    tokio::select! {
                        biased;
                        _ = wait_canceled(&mut cancel) => return Err(WorkflowError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Waits for a named signal, recording its payload so a re-driven run
    /// observes the same decision.
    pub async fn wait_signal<T>(&mut self, name: &str) -> Result<T, WorkflowError>
    where
        T: DeserializeOwned,
    {
        let key = signal_checkpoint_key(name);
        if let Some(recorded) = self.checkpoints.get(&key) {
            return decode_recorded(&key, recorded.clone());
        }

        let rx = ensure_receiver(
            &mut self.receivers,
            &self.signals,
            &self.execution_id,
            name,
        )?;
        let mut cancel = self.cancel.clone();

        let payload = tokio::select! {
            biased;
            _ = wait_canceled(&mut cancel) => return Err(WorkflowError::Canceled),
            received = rx.recv() => match received {
                Some(payload) => payload,
                None => return Err(WorkflowError::Canceled),
            },
        };

        self.record(&key, payload.clone()).await?;
        decode_recorded(&key, payload)
    }

    /// Waits for a named signal or a timer, whichever fires first. `None`
    /// means the timer fired. The outcome is recorded either way.
    pub async fn wait_signal_with_timer<T>(
        &mut self,
        name: &str,
        timer: Duration,
    ) -> Result<Option<T>, WorkflowError>
    where
        T: DeserializeOwned,
    {
        let key = signal_checkpoint_key(name);
        if let Some(recorded) = self.checkpoints.get(&key) {
            if recorded.is_null() {
                return Ok(None);
            }
            return decode_recorded(&key, recorded.clone()).map(Some);
        }

        let rx = ensure_receiver(
            &mut self.receivers,
            &self.signals,
            &self.execution_id,
            name,
        )?;
        let mut cancel = self.cancel.clone();

        let payload = tokio::select! {
            biased;
            _ = wait_canceled(&mut cancel) => return Err(WorkflowError::Canceled),
            received = rx.recv() => match received {
                Some(payload) => Some(payload),
                None => return Err(WorkflowError::Canceled),
            },
            _ = tokio::time::sleep(timer) => None,
        };

        self.record(&key, payload.clone().unwrap_or(JsonValue::Null))
            .await?;
        match payload {
            Some(value) => decode_recorded(&key, value).map(Some),
            None => Ok(None),
        }
    }

    async fn record(&mut self, key: &str, value: JsonValue) -> Result<(), WorkflowError> {
        self.store
            .save_checkpoint(self.db_id, key, &value)
            .await
            .map_err(|err| {
                WorkflowError::Failed(format!("step {}: record result: {}", key, err))
            })?;
        self.checkpoints.insert(key.to_string(), value);
        Ok(())
    }
}

/// Resolves when the watch flips to `true` or its sender is gone.
pub(crate) async fn wait_canceled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

fn signal_checkpoint_key(name: &str) -> String {
    format!("signal:{}", name)
}

fn decode_recorded<T: DeserializeOwned>(name: &str, value: JsonValue) -> Result<T, WorkflowError> {
    serde_json::from_value(value).map_err(|err| {
        WorkflowError::Failed(format!("step {}: decode recorded result: {}", name, err))
    })
}

fn ensure_receiver<'a>(
    receivers: &'a mut HashMap<String, mpsc::Receiver<JsonValue>>,
    signals: &SignalHub,
    execution_id: &str,
    name: &str,
) -> Result<&'a mut mpsc::Receiver<JsonValue>, WorkflowError> {
    match receivers.entry(name.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(vacant) => {
            let rx = signals.take_receiver(execution_id, name).ok_or_else(|| {
                WorkflowError::Failed(format!("signal {}: channel unavailable", name))
            })?;
            Ok(vacant.insert(rx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executions::MemoryExecutionStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        store: Arc<MemoryExecutionStore>,
        hub: Arc<SignalHub>,
        permits: Arc<Semaphore>,
        cancel_tx: watch::Sender<bool>,
    }

    impl Fixture {
        fn new() -> Self {
            let (cancel_tx, _) = watch::channel(false);
            Self {
                store: Arc::new(MemoryExecutionStore::new()),
                hub: Arc::new(SignalHub::new()),
                permits: Arc::new(Semaphore::new(4)),
                cancel_tx,
            }
        }

        async fn context(&self, execution_id: &str) -> WorkflowContext {
            let record = match self.store.latest(execution_id).await.unwrap() {
                Some(record) => record,
                None => self
                    .store
                    .insert(execution_id, "test", &json!({}))
                    .await
                    .unwrap(),
            };
            self.hub.attach(execution_id);
            WorkflowContext::new(
                &record,
                self.store.clone(),
                self.hub.clone(),
                self.permits.clone(),
                self.cancel_tx.subscribe(),
            )
        }
    }

    #[tokio::test]
    async fn test_step_memoizes_results() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;
        let calls = Arc::new(AtomicU32::new(0));

        let step_calls = calls.clone();
        let value: u64 = ctx
            .step("load", move || {
                let calls = step_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);

        // Same run: served from the local cache.
        let step_calls = calls.clone();
        let value: u64 = ctx
            .step("load", move || {
                let calls = step_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);

        // Re-driven run: served from the stored record.
        let mut replayed = fixture.context("wf-1").await;
        let step_calls = calls.clone();
        let value: u64 = replayed
            .step("load", move || {
                let calls = step_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_retries_until_success() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;
        let calls = Arc::new(AtomicU32::new(0));

        let step_calls = calls.clone();
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(10),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_millis(100),
            max_attempts: 5,
        };
        let value: String = ctx
            .step_with_retry("flaky", policy, move || {
                let calls = step_calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ActivityError::retryable("transient"))
                    } else {
                        Ok("done".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_gives_up_after_max_attempts() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;
        let calls = Arc::new(AtomicU32::new(0));

        let step_calls = calls.clone();
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_millis(10),
            max_attempts: 3,
        };
        let err = ctx
            .step_with_retry::<u64, _, _>("down", policy, move || {
                let calls = step_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ActivityError::retryable("still down"))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::Failed(_)));
        assert!(err.to_string().contains("still down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;
        let calls = Arc::new(AtomicU32::new(0));

        let step_calls = calls.clone();
        let err = ctx
            .step::<u64, _, _>("bad", move || {
                let calls = step_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ActivityError::non_retryable("unsupported location source"))
                }
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("unsupported location source"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_step_deadline() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;

        let opts = RemoteActivityOptions {
            start_to_close: Duration::from_secs(1),
            retry: RetryPolicy::none(),
            retry_on_timeout: false,
        };
        let err = ctx
            .step_remote::<u64, _, _>("slow", opts, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(1)
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_wait_signal_records_payload() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;

        fixture
            .hub
            .send("wf-1", "decision", json!({"verdict": "approved"}))
            .unwrap();

        let payload: JsonValue = ctx.wait_signal("decision").await.unwrap();
        assert_eq!(payload["verdict"], "approved");

        // A re-driven run sees the recorded payload without a live channel.
        fixture.hub.detach("wf-1");
        let mut replayed = fixture.context("wf-1").await;
        let payload: JsonValue = replayed.wait_signal("decision").await.unwrap();
        assert_eq!(payload["verdict"], "approved");
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_timer_fires_without_signal() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;

        let outcome: Option<JsonValue> = ctx
            .wait_signal_with_timer("upload-done", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(outcome.is_none());

        // The expired wait is recorded; a replay does not wait again.
        let mut replayed = fixture.context("wf-1").await;
        let outcome: Option<JsonValue> = replayed
            .wait_signal_with_timer("upload-done", Duration::from_secs(900))
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_waits() {
        let fixture = Fixture::new();
        let mut ctx = fixture.context("wf-1").await;

        fixture.cancel_tx.send(true).unwrap();
        let err = ctx.wait_signal::<JsonValue>("decision").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Canceled));
    }
}
