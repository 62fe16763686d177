//! Job coordinator (C7): recurring ingestion jobs with dependency gating and
//! crash recovery.

use crate::error::{AppError, AppResult};
use crate::repository::job_history::JobHistoryRepository;
use async_trait::async_trait;
use dashmap::DashSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> AppResult<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub description: String,
    pub interval: Option<Duration>,
    pub delay: Option<Duration>,
    pub skip_if_other_in_progress: Vec<String>,
    pub post_execute: Vec<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            interval: None,
            delay: None,
            skip_if_other_in_progress: Vec::new(),
            post_execute: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn skip_if_running(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skip_if_other_in_progress = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn then_run(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.post_execute = names.into_iter().map(Into::into).collect();
        self
    }
}

/// Parses `"30s"`, `"15m"`, `"2h"`, `"1d"`; a bare integer is milliseconds.
pub fn parse_duration(raw: &str) -> AppResult<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::configuration("empty duration"));
    }
    if let Ok(ms) = raw.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    let (digits, unit) = raw.split_at(raw.len() - 1);
    let amount: u64 = digits
        .parse()
        .map_err(|_| AppError::configuration(format!("invalid duration: {raw}")))?;
    match unit {
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount * 60)),
        "h" => Ok(Duration::from_secs(amount * 3600)),
        "d" => Ok(Duration::from_secs(amount * 86400)),
        _ => Err(AppError::configuration(format!("invalid duration unit: {raw}"))),
    }
}

/// Recurring-job coordinator. Runs any number of jobs in parallel subject to
/// the per-job singleton rule and `skipIfOtherInProgress`; timer fires never
/// overlap for the same job (§5).
pub struct Scheduler {
    job_history: JobHistoryRepository,
    specs: HashMap<String, JobSpec>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    running: Arc<DashSet<String>>,
    cancel: CancellationToken,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(job_history: JobHistoryRepository) -> Self {
        Self {
            job_history,
            specs: HashMap::new(),
            handlers: HashMap::new(),
            running: Arc::new(DashSet::new()),
            cancel: CancellationToken::new(),
            timers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&mut self, spec: JobSpec, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(spec.name.clone(), handler);
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Crash recovery: any row left `running` from a prior process is
    /// transitioned to `cancelled`. Must run before `start()`.
    pub async fn initialize(&self) -> AppResult<()> {
        let cancelled = self.job_history.cancel_all_running().await?;
        if cancelled > 0 {
            warn!(cancelled, "recovered job_history rows left running at crash");
        }
        Ok(())
    }

    /// Arms a recurring timer per scheduled job plus a one-shot startup run
    /// after its configured delay, so jobs fire promptly instead of waiting
    /// a full interval.
    pub fn start(self: &Arc<Self>) {
        let mut handles = Vec::new();
        for spec in self.specs.values() {
            let name = spec.name.clone();

            if let Some(delay) = spec.delay {
                let scheduler = Arc::clone(self);
                let name = name.clone();
                let cancel = self.cancel.clone();
                handles.push(tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            if let Err(err) = scheduler.run_job(&name).await {
                                warn!(job = %name, %err, "startup run failed");
                            }
                        }
                        _ = cancel.cancelled() => {}
                    }
                }));
            }

            if let Some(interval) = spec.interval {
                let scheduler = Arc::clone(self);
                let name = name.clone();
                let cancel = self.cancel.clone();
                handles.push(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                if let Err(err) = scheduler.run_job(&name).await {
                                    warn!(job = %name, %err, "scheduled run failed");
                                }
                            }
                            _ = cancel.cancelled() => return,
                        }
                    }
                }));
            }
        }

        if let Ok(mut guard) = self.timers.try_lock() {
            *guard = handles;
        }
    }

    /// Cancels all timers and waits for in-flight job handlers to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.timers.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        while !self.running.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn is_blocked(&self, name: &str) -> Vec<String> {
        let Some(spec) = self.specs.get(name) else { return Vec::new() };
        spec.skip_if_other_in_progress
            .iter()
            .filter(|other| self.running.contains(*other))
            .cloned()
            .collect()
    }

    pub fn run_job<'a>(
        self: &'a Arc<Self>,
        name: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = AppResult<()>> + Send + 'a>> {
        Box::pin(async move {
            if self.running.contains(name) {
                return Err(AppError::AlreadyRunning(name.to_string()));
            }

            let mut blocking = self.is_blocked(name);
            if blocking.is_empty() {
                if let Some(spec) = self.specs.get(name) {
                    for other in &spec.skip_if_other_in_progress {
                        if self.job_history.is_running(other).await? {
                            blocking.push(other.clone());
                        }
                    }
                }
            }
            if !blocking.is_empty() {
                return Err(AppError::Blocked(blocking));
            }

            let Some(handler) = self.handlers.get(name).cloned() else {
                return Err(AppError::not_found(format!("no handler registered for job {name}")));
            };

            self.running.insert(name.to_string());
            self.job_history.mark_running(name, None).await?;
            info!(job = name, "job started");

            let result = handler.run().await;
            self.running.remove(name);

            match &result {
                Ok(message) => {
                    self.job_history.mark_completed(name, None, message.as_deref()).await?;
                    info!(job = name, "job completed");
                }
                Err(err) => {
                    self.job_history.mark_failed(name, None, &err.to_string()).await?;
                    error!(job = name, %err, "job failed");
                }
            }

            if result.is_ok() {
                if let Some(spec) = self.specs.get(name) {
                    for next in spec.post_execute.clone() {
                        if let Err(err) = self.run_job(&next).await {
                            warn!(job = %next, %err, "post-execute chain failed");
                        }
                    }
                }
            }

            result.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Store;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self) -> AppResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        async fn run(&self) -> AppResult<Option<String>> {
            Err(AppError::internal("boom"))
        }
    }

    #[test]
    fn parses_time_unit_suffixes() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("500").unwrap(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn run_job_executes_and_records_history() {
        let store = Store::connect_test().await.unwrap();
        let mut scheduler = Scheduler::new(JobHistoryRepository::new(store));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler.register(JobSpec::new("sync", "sync job"), Arc::new(CountingHandler { calls: calls.clone() }));
        let scheduler = Arc::new(scheduler);

        scheduler.run_job("sync").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skip_if_other_in_progress_blocks_dependent_job() {
        let store = Store::connect_test().await.unwrap();
        let mut scheduler = Scheduler::new(JobHistoryRepository::new(store));
        scheduler.register(JobSpec::new("a", "a"), Arc::new(FailingHandler));
        scheduler.register(
            JobSpec::new("b", "b").skip_if_running(["a"]),
            Arc::new(CountingHandler { calls: Arc::new(AtomicU32::new(0)) }),
        );
        let scheduler = Arc::new(scheduler);

        scheduler.running.insert("a".to_string());
        let result = scheduler.run_job("b").await;
        assert!(matches!(result, Err(AppError::Blocked(jobs)) if jobs == vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn already_running_job_is_rejected() {
        let store = Store::connect_test().await.unwrap();
        let mut scheduler = Scheduler::new(JobHistoryRepository::new(store));
        scheduler.register(JobSpec::new("sync", "sync"), Arc::new(FailingHandler));
        let scheduler = Arc::new(scheduler);
        scheduler.running.insert("sync".to_string());

        let result = scheduler.run_job("sync").await;
        assert!(matches!(result, Err(AppError::AlreadyRunning(name)) if name == "sync"));
    }
}
