use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use resync_core::{FileChangesEvent, LocalOperationEvent, ReconcileConfig};
use resync_engine::{Collaborators, Completed, Lifecycle, PassReport, Reconciler, ShutdownHook};

use crate::error::{io_err, DaemonError};
use crate::watch::WatchBridge;

const CHANNEL_CAPACITY: usize = 64;

/// Something the loop did, reported to an optional observer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    Local { report: PassReport },
    Batch { changes: usize, report: PassReport },
    Completed { done: Completed },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub local_events: usize,
    pub batches: usize,
    pub completed: usize,
    /// Sub-operations still running at shutdown.
    pub aborted: usize,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Sending side of a [`Service`]. Cheap to clone.
#[derive(Clone)]
pub struct ServiceHandle {
    local_tx: mpsc::Sender<LocalOperationEvent>,
    batch_tx: mpsc::Sender<FileChangesEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ServiceHandle {
    pub async fn local(&self, event: LocalOperationEvent) -> Result<(), DaemonError> {
        self.local_tx
            .send(event)
            .await
            .map_err(|_| DaemonError::ChannelClosed("local operations"))
    }

    pub async fn batch(&self, event: FileChangesEvent) -> Result<(), DaemonError> {
        self.batch_tx
            .send(event)
            .await
            .map_err(|_| DaemonError::ChannelClosed("file changes"))
    }

    pub fn batch_sender(&self) -> mpsc::Sender<FileChangesEvent> {
        self.batch_tx.clone()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Owns the engine and runs every handler on one task, so passes never
/// overlap. Sub-operations finish in the same loop.
pub struct Service {
    engine: Reconciler,
    local_rx: mpsc::Receiver<LocalOperationEvent>,
    batch_rx: mpsc::Receiver<FileChangesEvent>,
    shutdown_rx: broadcast::Receiver<()>,
    observer: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl Service {
    /// Build the loop and register its teardown with `lifecycle`. Teardown
    /// stops the loop, which then closes both input channels.
    pub fn new(engine: Reconciler, lifecycle: &dyn Lifecycle) -> (Self, ServiceHandle) {
        let (local_tx, local_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (batch_tx, batch_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(16);

        let teardown_tx = shutdown_tx.clone();
        lifecycle.on_shutdown(Box::new(move || {
            tracing::info!("lifecycle shutdown, releasing subscriptions");
            let _ = teardown_tx.send(());
        }));

        let service = Self {
            engine,
            local_rx,
            batch_rx,
            shutdown_rx,
            observer: None,
        };
        let handle = ServiceHandle {
            local_tx,
            batch_tx,
            shutdown_tx,
        };
        (service, handle)
    }

    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn spawn(self) -> JoinHandle<LoopStats> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown, or until both inputs are closed and nothing is in
    /// flight.
    pub async fn run(mut self) -> LoopStats {
        let mut stats = LoopStats::default();
        let mut local_open = true;
        let mut batch_open = true;

        loop {
            if !local_open && !batch_open && self.engine.pending() == 0 {
                tracing::info!("input streams closed, stopping loop");
                break;
            }

            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
                event = self.local_rx.recv(), if local_open => match event {
                    Some(event) => {
                        stats.local_events += 1;
                        let report = self.engine.handle_local_operation(&event);
                        self.observe(LoopEvent::Local { report });
                    }
                    None => local_open = false,
                },
                batch = self.batch_rx.recv(), if batch_open => match batch {
                    Some(batch) => {
                        stats.batches += 1;
                        let report = self.engine.handle_file_changes(&batch);
                        self.observe(LoopEvent::Batch {
                            changes: batch.len(),
                            report,
                        });
                    }
                    None => batch_open = false,
                },
                done = self.engine.next_completed(), if self.engine.pending() > 0 => {
                    if let Some(done) = done {
                        stats.completed += 1;
                        self.observe(LoopEvent::Completed { done });
                    }
                }
            }
        }

        stats.aborted = self.engine.pending();
        if stats.aborted > 0 {
            tracing::warn!(aborted = stats.aborted, "aborting in-flight sub-operations");
        }
        self.engine.abort_pending();
        self.local_rx.close();
        self.batch_rx.close();
        stats
    }

    fn observe(&self, event: LoopEvent) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Watch entry points
// ---------------------------------------------------------------------------

/// Channel for [`Service::with_observer`].
pub fn observer_channel() -> (
    mpsc::UnboundedSender<LoopEvent>,
    mpsc::UnboundedReceiver<LoopEvent>,
) {
    mpsc::unbounded_channel()
}

/// Watch `root` and reconcile until ctrl-c, blocking the current thread.
pub fn watch_blocking(
    root: &Path,
    config: ReconcileConfig,
    collab: Collaborators,
    observer: Option<mpsc::UnboundedSender<LoopEvent>>,
) -> Result<LoopStats, DaemonError> {
    init_tracing();
    runtime()?.block_on(watch(root.to_path_buf(), config, collab, observer))
}

/// Configuration for a session: `explicit` when given, else the user's
/// `~/.config/resync/config.yaml`.
pub fn effective_config(explicit: Option<ReconcileConfig>) -> Result<ReconcileConfig, DaemonError> {
    match explicit {
        Some(config) => Ok(config),
        None => Ok(resync_core::config::load()?),
    }
}

/// Single-threaded runtime the loop and its callers share.
pub fn runtime() -> Result<tokio::runtime::Runtime, DaemonError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

pub async fn watch(
    root: PathBuf,
    config: ReconcileConfig,
    collab: Collaborators,
    observer: Option<mpsc::UnboundedSender<LoopEvent>>,
) -> Result<LoopStats, DaemonError> {
    let hook = Arc::new(ShutdownHook::new());
    let window = config.batch_window();
    let (service, handle) = Service::new(Reconciler::new(config, collab), hook.as_ref());
    let service = match observer {
        Some(observer) => service.with_observer(observer),
        None => service,
    };

    let bridge = WatchBridge::start(&root, window, handle.batch_sender(), handle.subscribe_shutdown())?;
    tracing::info!(root = %bridge.root(), batch_window_ms = window.as_millis() as u64, "watching");

    let signal_handle = {
        let hook = Arc::clone(&hook);
        let mut shutdown_rx = handle.subscribe_shutdown();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => tracing::info!("received ctrl-c, shutting down"),
                        Err(err) => tracing::warn!(error = %err, "ctrl-c handler failed"),
                    }
                    hook.shutdown();
                }
            }
        })
    };

    let stats = service.run().await;
    hook.shutdown();
    drop(handle);

    bridge.stop().await?;
    signal_handle.await.map_err(|err| DaemonError::Join {
        task: "signal_handler",
        message: err.to_string(),
    })?;

    tracing::info!(
        local_events = stats.local_events,
        batches = stats.batches,
        completed = stats.completed,
        aborted = stats.aborted,
        "watch loop stopped",
    );
    Ok(stats)
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`),
/// JSON lines when `RESYNC_LOG_FORMAT=json`. Logs go to stderr.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("RESYNC_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use resync_core::{ChangeEvent, OpenHandle, PathCasing, ResourceIdentity};
    use resync_engine::memory::{MemoryWorkbench, RecordingErrorSink};
    use resync_engine::ManualClock;

    fn r(s: &str) -> ResourceIdentity {
        ResourceIdentity::parse(s).expect("identity")
    }

    fn engine(bench: &Arc<MemoryWorkbench>) -> Reconciler {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let config = ReconcileConfig::default().with_casing(PathCasing::Sensitive);
        Reconciler::new(
            config,
            bench.collaborators(clock, Arc::new(RecordingErrorSink::default())),
        )
    }

    #[tokio::test(flavor = "current_thread")]
    async fn teardown_fires_once_and_closes_both_inputs() {
        let bench = Arc::new(MemoryWorkbench::new());
        let hook = ShutdownHook::new();
        let (service, handle) = Service::new(engine(&bench), &hook);
        let join = service.spawn();

        hook.shutdown();
        hook.shutdown();
        let stats = join.await.expect("loop task");

        assert_eq!(stats, LoopStats::default());
        assert!(hook.is_shut_down());
        assert!(matches!(
            handle.local(LocalOperationEvent::deleted(r("/a"))).await,
            Err(DaemonError::ChannelClosed(_))
        ));
        assert!(matches!(
            handle.batch(FileChangesEvent::default()).await,
            Err(DaemonError::ChannelClosed(_))
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn loop_serves_both_streams_and_finishes_sub_operations() {
        let bench = Arc::new(MemoryWorkbench::new());
        let group = bench.add_group();
        bench.open(group, OpenHandle::text(1, r("/a.txt")), false);
        bench.open(group, OpenHandle::text(2, r("/dir/b.txt")), false);

        let hook = ShutdownHook::new();
        let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
        let (service, handle) = Service::new(engine(&bench), &hook);
        let join = service.with_observer(observer_tx).spawn();

        handle
            .local(LocalOperationEvent::moved(r("/dir"), r("/new")))
            .await
            .expect("send local");
        handle
            .batch(FileChangesEvent::new(vec![ChangeEvent::deleted(r("/a.txt"))]))
            .await
            .expect("send batch");

        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(observer_rx.recv().await.expect("observer event"));
        }
        hook.shutdown();
        let stats = join.await.expect("loop task");

        assert_eq!(stats.local_events, 1);
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.completed, 1);
        assert!(seen.iter().any(|e| matches!(e, LoopEvent::Completed { .. })));
        assert_eq!(bench.open_resources(), vec![r("/new/b.txt")]);
    }

    #[test]
    fn explicit_config_is_used_as_is() {
        let explicit = ReconcileConfig {
            close_on_delete: false,
            ..ReconcileConfig::default()
        };
        assert_eq!(effective_config(Some(explicit.clone())).expect("config"), explicit);

        let err = DaemonError::from(resync_core::ConfigError::HomeNotFound);
        assert!(matches!(err, DaemonError::Config(_)));
        assert!(err.to_string().contains("home directory"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn loop_stops_once_every_sender_is_gone() {
        let bench = Arc::new(MemoryWorkbench::new());
        let hook = ShutdownHook::new();
        let (service, handle) = Service::new(engine(&bench), &hook);
        let join = service.spawn();

        drop(handle);
        let stats = join.await.expect("loop task");

        assert_eq!(stats, LoopStats::default());
        assert!(!hook.is_shut_down());
    }
}
