//! Periodic background tasks and their coordinated shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::epoch;
use crate::error::AppError;
use crate::metrics::MetricsClient;
use crate::node::{self, NodeVersion};
use crate::peers::ProbePhase;
use crate::process::{ConnectionTable, ProcessMonitor};
use crate::state::AppState;

pub const PROCESS_PERIOD: Duration = Duration::from_secs(1);
pub const DISCOVERY_PERIOD: Duration = Duration::from_secs(1);
pub const PROBE_PERIOD: Duration = Duration::from_secs(10);
pub const BOOKKEEPING_PERIOD: Duration = Duration::from_secs(20);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one successful run of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Talked to the node; clears the failure streak
    Success,
    /// Nothing to do this round; the failure streak is left alone
    Idle,
}

/// Owns the cancellation token and the join handles of all background tasks
pub struct TaskScheduler {
    cancel_token: CancellationToken,
    task_handles: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            task_handles: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn register_task(&mut self, handle: JoinHandle<()>) {
        self.task_handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.task_handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_handles.is_empty()
    }

    /// Run `job` now and then every `period` until cancelled. Errors are
    /// logged and counted; they never stop the loop.
    pub fn spawn_periodic<F, Fut>(
        &mut self,
        name: &'static str,
        period: Duration,
        state: Arc<AppState>,
        job: F,
    ) where
        F: Fn(Arc<AppState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome, AppError>> + Send + 'static,
    {
        let token = self.token();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    result = job(state.clone()) => settle(&state, name, result),
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            debug!(task = name, "Task stopped");
        });
        self.register_task(handle);
    }

    /// Cancel every task and wait for them, bounded by a timeout
    pub async fn shutdown(mut self) {
        self.cancel_token.cancel();

        let shutdown_tasks = std::pin::pin!(async {
            for handle in self.task_handles.drain(..) {
                let _ = handle.await;
            }
        });

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown_tasks).await {
            Ok(_) => info!("✓ All tasks shut down gracefully"),
            Err(_) => warn!("⏱️  Shutdown timeout: Some tasks did not complete"),
        }
    }
}

/// Fold one run's result into the task's failure streak
fn settle(state: &AppState, name: &'static str, result: Result<TaskOutcome, AppError>) {
    match result {
        Ok(TaskOutcome::Success) => state.failures.record_success(name),
        Ok(TaskOutcome::Idle) => {}
        Err(e) => {
            let failures = state.failures.record_failure(name);
            warn!(task = name, failures, "⚠️  {} failed: {}", name, e);
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// External collaborators the pollers talk to
pub struct Pollers {
    pub metrics: Arc<MetricsClient>,
    pub process: Arc<ProcessMonitor>,
    pub connections: Arc<dyn ConnectionTable>,
}

/// Register the metrics, process, discovery, probe and bookkeeping tasks,
/// plus a one-shot public IP lookup
pub fn spawn_pollers(scheduler: &mut TaskScheduler, state: Arc<AppState>, pollers: Pollers) {
    let metrics_period = Duration::from_secs(state.config.prometheus.refresh);

    let client = pollers.metrics;
    scheduler.spawn_periodic("metrics", metrics_period, state.clone(), move |state| {
        let client = client.clone();
        async move { poll_metrics(&state, &client).await }
    });

    let monitor = pollers.process;
    scheduler.spawn_periodic("process", PROCESS_PERIOD, state.clone(), move |state| {
        let monitor = monitor.clone();
        async move { poll_process(&state, monitor).await }
    });

    let table = pollers.connections;
    scheduler.spawn_periodic("discovery", DISCOVERY_PERIOD, state.clone(), move |state| {
        let table = table.clone();
        async move { discover_peers(&state, table).await }
    });

    scheduler.spawn_periodic("probe", PROBE_PERIOD, state.clone(), |state| async move {
        probe_peers(&state).await
    });

    scheduler.spawn_periodic("bookkeeping", BOOKKEEPING_PERIOD, state.clone(), |state| async move {
        bookkeeping(&state).await
    });

    let token = scheduler.token();
    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            result = node::fetch_public_ip() => match result {
                Ok(ip) => state.discovery.set_public_ip(Some(ip)),
                Err(e) => warn!("⚠️  Could not resolve public IP, only loopback is excluded: {}", e),
            },
        }
    });
    scheduler.register_task(handle);
}

pub async fn poll_metrics(
    state: &AppState,
    client: &MetricsClient,
) -> Result<TaskOutcome, AppError> {
    let metrics = client.fetch().await?;
    state.set_metrics(metrics);
    Ok(TaskOutcome::Success)
}

pub async fn poll_process(
    state: &AppState,
    monitor: Arc<ProcessMonitor>,
) -> Result<TaskOutcome, AppError> {
    let snapshot = tokio::task::spawn_blocking(move || monitor.refresh()).await??;
    state.set_process(snapshot);
    Ok(TaskOutcome::Success)
}

/// Refresh the peer working set; a changed set restarts the analysis
pub async fn discover_peers(
    state: &AppState,
    table: Arc<dyn ConnectionTable>,
) -> Result<TaskOutcome, AppError> {
    let Some(pid) = state.process().map(|p| p.pid) else {
        return Ok(TaskOutcome::Idle);
    };
    let connections = tokio::task::spawn_blocking(move || table.connections(pid)).await??;
    if state.discovery.refresh(&connections) {
        state.prober.reset();
    }
    Ok(TaskOutcome::Success)
}

pub async fn probe_peers(state: &AppState) -> Result<TaskOutcome, AppError> {
    if state.prober.phase() == ProbePhase::Done {
        return Ok(TaskOutcome::Idle);
    }
    let peers = state.discovery.snapshot();
    if peers.is_empty() {
        return Ok(TaskOutcome::Idle);
    }
    state.prober.run_pass(&peers).await;
    Ok(TaskOutcome::Success)
}

/// Slow-changing facts: chain position, node version, P2P flag, role
pub async fn bookkeeping(state: &AppState) -> Result<TaskOutcome, AppError> {
    state.update_chain(epoch::now_unix_secs());

    match NodeVersion::query(&state.config.node.binary).await {
        Ok(version) => state.set_node_version(version),
        Err(e) => debug!("Node version unavailable: {}", e),
    }

    let process = state.process();
    let p2p = node::detect_p2p(state.genesis.network, process.as_ref(), state.p2p());
    state.set_p2p(p2p);
    state.refresh_role();
    Ok(TaskOutcome::Idle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::genesis::GenesisModel;
    use crate::log_buffer::LogBuffer;
    use crate::peers::{DisabledGeoLocator, DiscoveryConfig, LatencyProber, PeerDiscovery, TcpInfoProbe};
    use crate::process::{ProcessSnapshot, TcpConnection};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state() -> Arc<AppState> {
        let config = Config::default();
        let genesis = GenesisModel::resolve(&config).unwrap();
        let discovery = PeerDiscovery::new(DiscoveryConfig::from_config(&config));
        let prober = LatencyProber::new(
            Arc::new(TcpInfoProbe::default()),
            Arc::new(DisabledGeoLocator),
        );
        Arc::new(AppState::new(
            config,
            genesis,
            discovery,
            prober,
            Arc::new(LogBuffer::new(10)),
        ))
    }

    struct StaticTable(Vec<TcpConnection>);

    impl ConnectionTable for StaticTable {
        fn connections(&self, _pid: u32) -> Result<Vec<TcpConnection>, AppError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_errors_count_and_idle_keeps_streak() {
        let state = state();
        let mut scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        scheduler.spawn_periodic("flaky", Duration::from_millis(10), state.clone(), move |_| {
            let run = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if run < 2 {
                    Err(AppError::Metrics("boom".into()))
                } else {
                    Ok(TaskOutcome::Idle)
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(runs.load(Ordering::SeqCst) >= 3);
        // idle runs leave the streak alone
        assert_eq!(state.failures.count(), 2);

        state.failures.record_success("flaky");
        scheduler.shutdown().await;
    }

    #[test]
    fn test_healthy_task_does_not_mask_failing_one() {
        let state = state();
        for _ in 0..state.failures.threshold() {
            settle(&state, "metrics", Err(AppError::Metrics("connection refused".into())));
            settle(&state, "process", Ok(TaskOutcome::Success));
            settle(&state, "discovery", Ok(TaskOutcome::Success));
        }
        assert!(state.failures.exceeded());
        assert!(state.failures.check().unwrap_err().is_fatal());

        settle(&state, "metrics", Ok(TaskOutcome::Success));
        assert!(state.failures.check().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_stops_tasks() {
        let state = state();
        let mut scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.spawn_periodic("tick", Duration::from_millis(5), state, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(TaskOutcome::Success) }
        });
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await;
        let after = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after);
    }

    #[tokio::test]
    async fn test_discovery_waits_for_process() {
        let state = state();
        let conns = vec![TcpConnection::established(
            "10.0.2.15:3001".parse().unwrap(),
            "10.0.0.5:3001".parse().unwrap(),
        )];
        let table: Arc<dyn ConnectionTable> = Arc::new(StaticTable(conns));

        assert_eq!(
            discover_peers(&state, table.clone()).await.unwrap(),
            TaskOutcome::Idle
        );

        state.set_process(ProcessSnapshot {
            pid: 4242,
            name: "cardano-node".to_string(),
            cpu_percent: 1.0,
            rss_bytes: 1,
            uptime_secs: 1,
            cmdline: Vec::new(),
        });
        assert_eq!(
            discover_peers(&state, table).await.unwrap(),
            TaskOutcome::Success
        );
        assert_eq!(state.discovery.snapshot().len(), 1);
        assert_eq!(state.prober.phase(), ProbePhase::Idle);
    }

    #[tokio::test]
    async fn test_probe_is_idle_without_peers() {
        let state = state();
        assert_eq!(probe_peers(&state).await.unwrap(), TaskOutcome::Idle);
    }
}
