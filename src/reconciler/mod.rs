//! Reconciler - desired vs actual worker state
//!
//! ## Responsibilities
//!
//! - Activate / deactivate workers through the runtime driver
//! - Restart on config-fingerprint change
//! - Map runtime state to the stream connection status
//! - Periodic convergence loop, serialized per stream
//!
//! Every transition runs under the stream's lock so a concurrent activate and
//! deactivate cannot interleave their store writes and driver calls. Driver
//! calls carry their own deadlines, so a lock is never held indefinitely.

mod fingerprint;

pub use fingerprint::config_fingerprint;

use crate::error::{Error, Result};
use crate::frame_broker::FrameActivity;
use crate::runtime_driver::{WorkerDriver, WorkerSpec, WorkerState};
use crate::settings_manager::{RestartFailure, SettingsManager};
use crate::state::AppConfig;
use crate::stream_store::{ConnectionStatus, RuntimeFacts, Stream, StreamStore};
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Reconciler-initiated restarts allowed per stream per window
const RESTART_LIMIT: usize = 3;
const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Log lines captured into last_error when a worker exits
const ERROR_TAIL_LINES: usize = 20;

/// Sliding-window budget for automatic restarts.
///
/// Transient failures retry up to the limit per window; a permanent failure
/// halts the stream until an operator acts. Operator transitions clear both.
struct RestartBudget {
    limit: usize,
    window: Duration,
    attempts: HashMap<Uuid, VecDeque<Instant>>,
    halted: HashSet<Uuid>,
}

impl RestartBudget {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            attempts: HashMap::new(),
            halted: HashSet::new(),
        }
    }

    fn allow(&mut self, id: Uuid, now: Instant) -> bool {
        if self.halted.contains(&id) {
            return false;
        }
        let attempts = self.attempts.entry(id).or_default();
        while let Some(front) = attempts.front() {
            if now.duration_since(*front) >= self.window {
                attempts.pop_front();
            } else {
                break;
            }
        }
        if attempts.len() >= self.limit {
            return false;
        }
        attempts.push_back(now);
        true
    }

    fn halt(&mut self, id: Uuid) {
        self.halted.insert(id);
    }

    fn clear(&mut self, id: Uuid) {
        self.attempts.remove(&id);
        self.halted.remove(&id);
    }
}

/// Reconciler instance
pub struct Reconciler {
    streams: Arc<StreamStore>,
    driver: Arc<dyn WorkerDriver>,
    settings: Arc<SettingsManager>,
    activity: Arc<FrameActivity>,
    config: AppConfig,
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    budget: Mutex<RestartBudget>,
}

impl Reconciler {
    /// Create new Reconciler
    pub fn new(
        streams: Arc<StreamStore>,
        driver: Arc<dyn WorkerDriver>,
        settings: Arc<SettingsManager>,
        activity: Arc<FrameActivity>,
        config: AppConfig,
    ) -> Self {
        Self {
            streams,
            driver,
            settings,
            activity,
            config,
            locks: Mutex::new(HashMap::new()),
            budget: Mutex::new(RestartBudget::new(RESTART_LIMIT, RESTART_WINDOW)),
        }
    }

    /// Per-stream serialization lock, created on first reference
    async fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Drop bookkeeping for a deleted stream
    pub async fn forget(&self, id: Uuid) {
        self.locks.lock().await.remove(&id);
        self.budget.lock().await.clear(id);
    }

    /// Operator-initiated activation. Resets the restart budget.
    pub async fn activate(&self, id: Uuid) -> Result<Stream> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.budget.lock().await.clear(id);
        self.activate_locked(id).await
    }

    /// Operator-initiated deactivation. Resets the restart budget.
    pub async fn deactivate(&self, id: Uuid) -> Result<Stream> {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        self.budget.lock().await.clear(id);
        self.deactivate_locked(id).await
    }

    /// React to a declared-config change (PUT handler).
    pub async fn apply_config_change(&self, before: &Stream, after: &Stream) -> Result<()> {
        match (before.is_active, after.is_active) {
            (true, false) => {
                self.deactivate(after.id).await?;
            }
            (false, true) => {
                self.activate(after.id).await?;
            }
            (true, true) => {
                let settings = self.settings.current();
                let new_fp = config_fingerprint(after, &settings);
                if before.config_fingerprint.as_deref() != Some(new_fp.as_str()) {
                    tracing::info!(
                        stream_id = %after.id,
                        "Config fingerprint changed, restarting worker"
                    );
                    self.activate(after.id).await?;
                }
            }
            (false, false) => {}
        }
        Ok(())
    }

    /// Serial restart of every active stream (settings cascade). Failures are
    /// collected, successes are not rolled back.
    pub async fn restart_active_workers(&self) -> Result<(u32, Vec<RestartFailure>)> {
        let streams = self.streams.service().list().await?;
        let mut restarted = 0;
        let mut failures = Vec::new();

        for stream in streams.into_iter().filter(|s| s.is_active) {
            match self.activate(stream.id).await {
                Ok(_) => restarted += 1,
                Err(e) => {
                    tracing::warn!(
                        stream_id = %stream.id,
                        error = %e,
                        "Worker restart failed during settings cascade"
                    );
                    failures.push(RestartFailure {
                        stream_id: stream.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok((restarted, failures))
    }

    /// Activation body; caller holds the stream lock.
    async fn activate_locked(&self, id: Uuid) -> Result<Stream> {
        let stream = self.streams.service().get(id).await?;
        let settings = self.settings.current();
        let fp = config_fingerprint(&stream, &settings);

        // Identical config and a live worker: nothing to do
        if let Some(ref handle) = stream.worker_handle {
            if stream.config_fingerprint.as_deref() == Some(fp.as_str()) {
                if let Ok(status) = self.driver.inspect(handle).await {
                    if matches!(status.state, WorkerState::Running | WorkerState::Starting) {
                        tracing::debug!(stream_id = %id, "Activate is a no-op, worker already current");
                        if !stream.is_active {
                            return self.streams.service().set_active(id, true).await;
                        }
                        return Ok(stream);
                    }
                }
            }

            // Stale or outdated worker: stop before starting fresh
            if let Err(e) = self.driver.stop(handle).await {
                tracing::warn!(
                    stream_id = %id,
                    handle = %handle,
                    error = %e,
                    "Stop before restart failed, continuing"
                );
            }
        }

        let stream = self.streams.service().set_active(id, true).await?;
        let spec = WorkerSpec::build(&stream, &settings, &self.config);

        match self.driver.start(&spec).await {
            Ok(handle) => {
                let facts = RuntimeFacts {
                    worker_handle: Some(handle.clone()),
                    worker_started_at: Some(Utc::now()),
                    last_error: None,
                    connection_status: ConnectionStatus::Starting,
                    config_fingerprint: Some(fp),
                };
                self.streams.service().set_runtime_facts(id, &facts).await?;
                tracing::info!(stream_id = %id, handle = %handle, "Worker activated");
                self.streams.service().get(id).await
            }
            Err(e) => {
                if !e.retryable {
                    self.budget.lock().await.halt(id);
                }
                let facts = RuntimeFacts {
                    worker_handle: None,
                    worker_started_at: None,
                    last_error: Some(e.message.clone()),
                    connection_status: ConnectionStatus::Error,
                    config_fingerprint: None,
                };
                self.streams.service().set_runtime_facts(id, &facts).await?;
                tracing::error!(stream_id = %id, error = %e, "Worker start failed");
                Err(Error::from(e))
            }
        }
    }

    /// Deactivation body; caller holds the stream lock.
    async fn deactivate_locked(&self, id: Uuid) -> Result<Stream> {
        let stream = self.streams.service().get(id).await?;

        if let Some(ref handle) = stream.worker_handle {
            // Stop failure does not block: the handle is cleared after a
            // best-effort and the next loop iteration retries the runtime.
            if let Err(e) = self.driver.stop(handle).await {
                tracing::warn!(
                    stream_id = %id,
                    handle = %handle,
                    error = %e,
                    "Worker stop failed, clearing handle anyway"
                );
            }
        }

        self.streams.service().set_active(id, false).await?;
        let facts = RuntimeFacts {
            worker_handle: None,
            worker_started_at: None,
            last_error: None,
            connection_status: ConnectionStatus::Inactive,
            config_fingerprint: None,
        };
        self.streams.service().set_runtime_facts(id, &facts).await?;
        tracing::info!(stream_id = %id, "Worker deactivated");
        self.streams.service().get(id).await
    }

    /// Query the driver and map runtime state to a connection status.
    /// Returns the persisted status.
    pub async fn refresh_status(&self, stream: &Stream) -> Result<ConnectionStatus> {
        let service = self.streams.service();

        if !stream.is_active && stream.worker_handle.is_none() {
            if stream.status() != ConnectionStatus::Inactive {
                service
                    .set_status(stream.id, ConnectionStatus::Inactive, None)
                    .await?;
            }
            return Ok(ConnectionStatus::Inactive);
        }

        let Some(ref handle) = stream.worker_handle else {
            // Active without a handle: the loop converges this separately
            return Ok(stream.status());
        };

        let status = match self.driver.inspect(handle).await {
            Ok(s) => s,
            Err(e) => {
                service
                    .set_status(stream.id, ConnectionStatus::Error, Some(&e.message))
                    .await?;
                return Ok(ConnectionStatus::Error);
            }
        };

        let mapped = match status.state {
            WorkerState::Running => {
                if self
                    .activity
                    .is_fresh(stream.id, self.config.stale_frame_after)
                {
                    ConnectionStatus::Connected
                } else {
                    let age = stream
                        .worker_started_at
                        .map(|t| Utc::now() - t)
                        .and_then(|d| d.to_std().ok())
                        .unwrap_or(Duration::MAX);
                    if age < self.config.start_grace {
                        ConnectionStatus::Starting
                    } else {
                        ConnectionStatus::WorkerDown
                    }
                }
            }
            WorkerState::Starting => ConnectionStatus::Starting,
            WorkerState::Exited => {
                let tail = self
                    .driver
                    .tail(handle, ERROR_TAIL_LINES)
                    .await
                    .unwrap_or_default()
                    .join("\n");
                let message = if tail.is_empty() {
                    status
                        .last_error
                        .unwrap_or_else(|| "worker exited unexpectedly".to_string())
                } else {
                    tail
                };
                service
                    .set_status(stream.id, ConnectionStatus::Error, Some(&message))
                    .await?;
                return Ok(ConnectionStatus::Error);
            }
            WorkerState::Missing => {
                if stream.is_active {
                    let facts = RuntimeFacts {
                        worker_handle: None,
                        worker_started_at: None,
                        last_error: Some("worker vanished".to_string()),
                        connection_status: ConnectionStatus::Error,
                        config_fingerprint: None,
                    };
                    service.set_runtime_facts(stream.id, &facts).await?;
                    return Ok(ConnectionStatus::Error);
                }
                ConnectionStatus::Inactive
            }
        };

        if mapped != stream.status() {
            service
                .set_status(stream.id, mapped, stream.last_error.as_deref())
                .await?;
        }
        Ok(mapped)
    }

    /// Periodic convergence loop. Completes in-flight transitions on shutdown
    /// but starts no new ones.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        tracing::info!(
            interval_sec = self.config.reconcile_interval.as_secs(),
            "Reconciliation loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    tracing::info!("Reconciliation loop stopping");
                    break;
                }
            }

            let streams = match self.streams.service().list().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Reconcile tick failed to list streams");
                    continue;
                }
            };

            let active = streams.iter().filter(|s| s.is_active).count();
            metrics::gauge!("vectorflow_managed_streams").set(streams.len() as f64);
            metrics::gauge!("vectorflow_active_streams").set(active as f64);

            for stream in streams {
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = self.reconcile_one(&stream).await {
                    tracing::warn!(
                        stream_id = %stream.id,
                        error = %e,
                        "Reconcile step failed"
                    );
                }
            }
        }
    }

    /// Converge one stream toward its desired state.
    async fn reconcile_one(&self, stream: &Stream) -> Result<()> {
        if stream.is_active {
            if stream.worker_handle.is_none() {
                return self.try_auto_restart(stream.id).await;
            }
            let status = self.refresh_status(stream).await?;
            if status == ConnectionStatus::Error {
                // Worker exited or vanished; restart within budget
                return self.try_auto_restart(stream.id).await;
            }
            Ok(())
        } else if stream.worker_handle.is_some() {
            let lock = self.lock_for(stream.id).await;
            let _guard = lock.lock().await;
            self.deactivate_locked(stream.id).await.map(|_| ())
        } else {
            self.refresh_status(stream).await.map(|_| ())
        }
    }

    /// Budget-gated restart from the reconcile loop
    async fn try_auto_restart(&self, id: Uuid) -> Result<()> {
        if !self.budget.lock().await.allow(id, Instant::now()) {
            tracing::debug!(stream_id = %id, "Restart budget exhausted, leaving stream in error");
            return Ok(());
        }
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;
        match self.activate_locked(id).await {
            Ok(_) => Ok(()),
            Err(Error::NotFound(_)) => Ok(()),
            // Start failure is recorded on the stream; the next tick retries
            Err(e) => {
                tracing::warn!(stream_id = %id, error = %e, "Automatic restart failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_allows_up_to_limit() {
        let mut budget = RestartBudget::new(3, Duration::from_secs(60));
        let id = Uuid::new_v4();
        let now = Instant::now();
        assert!(budget.allow(id, now));
        assert!(budget.allow(id, now + Duration::from_secs(1)));
        assert!(budget.allow(id, now + Duration::from_secs(2)));
        assert!(!budget.allow(id, now + Duration::from_secs(3)));
    }

    #[test]
    fn test_budget_window_slides() {
        let mut budget = RestartBudget::new(3, Duration::from_secs(60));
        let id = Uuid::new_v4();
        let now = Instant::now();
        for i in 0..3 {
            assert!(budget.allow(id, now + Duration::from_secs(i)));
        }
        assert!(!budget.allow(id, now + Duration::from_secs(30)));
        // First attempt has aged out of the window
        assert!(budget.allow(id, now + Duration::from_secs(61)));
    }

    #[test]
    fn test_budget_halt_until_cleared() {
        let mut budget = RestartBudget::new(3, Duration::from_secs(60));
        let id = Uuid::new_v4();
        budget.halt(id);
        assert!(!budget.allow(id, Instant::now()));
        budget.clear(id);
        assert!(budget.allow(id, Instant::now()));
    }

    #[test]
    fn test_budget_is_per_stream() {
        let mut budget = RestartBudget::new(1, Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Instant::now();
        assert!(budget.allow(a, now));
        assert!(!budget.allow(a, now));
        assert!(budget.allow(b, now));
    }
}
