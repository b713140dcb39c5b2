use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tokio::sync::{broadcast, mpsc};
use tokio::time::advance;
use tokio_test::{assert_ok, assert_pending};

use resync_core::{ChangeEvent, FileChangesEvent, OpenHandle, PathCasing, ReconcileConfig, ResourceIdentity};
use resync_daemon::{batch_events, LoopEvent, Service, WatchBridge};
use resync_engine::memory::{MemoryWorkbench, RecordingErrorSink};
use resync_engine::{ManualClock, Reconciler, ShutdownHook};

fn r(s: &str) -> ResourceIdentity {
    ResourceIdentity::parse(s).expect("identity")
}

fn event(kind: EventKind, path: &str) -> notify::Result<Event> {
    Ok(Event::new(kind).add_path(PathBuf::from(path)))
}

fn modified(path: &str) -> notify::Result<Event> {
    event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), path)
}

struct Bridge {
    events: mpsc::UnboundedSender<notify::Result<Event>>,
    batches: mpsc::Receiver<FileChangesEvent>,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<Result<(), resync_daemon::DaemonError>>,
}

fn bridge(window: Duration) -> Bridge {
    let (events, event_rx) = mpsc::unbounded_channel();
    let (batch_tx, batches) = mpsc::channel(8);
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(batch_events(event_rx, batch_tx, window, shutdown_rx));
    Bridge {
        events,
        batches,
        shutdown,
        task,
    }
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn events_inside_the_window_share_one_batch() {
    let mut b = bridge(Duration::from_millis(50));

    b.events.send(event(EventKind::Create(CreateKind::File), "/w/a.txt")).unwrap();
    advance(Duration::from_millis(10)).await;
    b.events.send(modified("/w/b.txt")).unwrap();
    b.events.send(modified("/w/b.txt")).unwrap();
    {
        let mut early = tokio_test::task::spawn(b.batches.recv());
        assert_pending!(early.poll());
    }
    advance(Duration::from_millis(60)).await;

    let batch = b.batches.recv().await.expect("batch");
    assert_eq!(
        batch,
        FileChangesEvent::new(vec![
            ChangeEvent::added(r("/w/a.txt")),
            ChangeEvent::updated(r("/w/b.txt")),
        ])
    );

    drop(b.shutdown);
    drop(b.events);
    assert_ok!(b.task.await.expect("join"));
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn events_further_apart_than_the_window_split() {
    let mut b = bridge(Duration::from_millis(50));

    b.events.send(modified("/w/a.txt")).unwrap();
    advance(Duration::from_millis(100)).await;
    let first = b.batches.recv().await.expect("first batch");

    b.events
        .send(event(EventKind::Remove(RemoveKind::File), "/w/a.txt"))
        .unwrap();
    advance(Duration::from_millis(100)).await;
    let second = b.batches.recv().await.expect("second batch");

    assert_eq!(first.changes(), &[ChangeEvent::updated(r("/w/a.txt"))]);
    assert_eq!(second.changes(), &[ChangeEvent::deleted(r("/w/a.txt"))]);

    b.shutdown.send(()).unwrap();
    b.task.await.expect("join").expect("bridge");
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn closing_the_source_flushes_pending_changes() {
    let mut b = bridge(Duration::from_secs(10));

    b.events.send(modified("/w/a.txt")).unwrap();
    b.events
        .send(Err(notify::Error::generic("watch overflow")))
        .unwrap();
    drop(b.events);

    let batch = b.batches.recv().await.expect("flushed batch");
    assert_eq!(batch.len(), 1);
    b.task.await.expect("join").expect("bridge");
    drop(b.shutdown);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn bridged_batches_drive_the_loop() {
    let bench = Arc::new(MemoryWorkbench::new());
    let group = bench.add_group();
    bench.open(group, OpenHandle::text(1, r("/w/gone.txt")), false);
    bench.open(group, OpenHandle::text(2, r("/w/kept.txt")), false);

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let engine = Reconciler::new(
        ReconcileConfig::default().with_casing(PathCasing::Sensitive),
        bench.collaborators(clock, Arc::new(RecordingErrorSink::default())),
    );
    let hook = ShutdownHook::new();
    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
    let (service, handle) = Service::new(engine, &hook);
    let service = service.with_observer(observer_tx).spawn();

    let (events, event_rx) = mpsc::unbounded_channel();
    let bridge = tokio::spawn(batch_events(
        event_rx,
        handle.batch_sender(),
        Duration::from_millis(50),
        handle.subscribe_shutdown(),
    ));

    events
        .send(event(EventKind::Remove(RemoveKind::File), "/w/gone.txt"))
        .unwrap();
    advance(Duration::from_millis(60)).await;

    match observer_rx.recv().await.expect("loop event") {
        LoopEvent::Batch { changes, report } => {
            assert_eq!(changes, 1);
            assert_eq!(report.disposed.len(), 1);
        }
        other => panic!("expected a batch, got {other:?}"),
    }

    hook.shutdown();
    let stats = service.await.expect("loop");
    bridge.await.expect("join").expect("bridge");

    assert_eq!(stats.batches, 1);
    assert_eq!(bench.open_resources(), vec![r("/w/kept.txt")]);
}

#[tokio::test(flavor = "current_thread")]
async fn watch_bridge_reports_files_written_under_the_root() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let (batch_tx, mut batches) = mpsc::channel(8);
    let (_shutdown, shutdown_rx) = broadcast::channel(1);
    let bridge = WatchBridge::start(dir.path(), Duration::from_millis(50), batch_tx, shutdown_rx)
        .expect("start watcher");

    let canonical_dir = std::fs::canonicalize(dir.path()).expect("canonical dir");
    assert_eq!(
        bridge.root(),
        &ResourceIdentity::from_path(&canonical_dir).expect("root identity")
    );

    let file = canonical_dir.join("note.txt");
    std::fs::write(&file, "hello").expect("write file");
    let expected = ResourceIdentity::from_path(&file).expect("file identity");

    let batch = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let batch = batches.recv().await.expect("bridge closed early");
            if batch.changes().iter().any(|change| change.resource == expected) {
                return batch;
            }
        }
    })
    .await
    .expect("write reported within five seconds");
    assert!(batch.got_added() || batch.got_updated(), "{batch:?}");

    // Dropping the watcher closes the event source; the task drains and ends.
    let stopped = tokio::time::timeout(Duration::from_secs(5), bridge.stop())
        .await
        .expect("bridge stopped within five seconds");
    assert_ok!(stopped);
}
