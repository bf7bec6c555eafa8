use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::common::error::AdapterError;

/// Reason why the node inventory should be scanned again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSignal {
    IntervalElapsed,
    ConfigFileChanged,
}

impl Display for RefreshSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshSignal::IntervalElapsed => f.write_str("interval elapsed"),
            RefreshSignal::ConfigFileChanged => f.write_str("config file changed"),
        }
    }
}

pub type RefreshSender = mpsc::Sender<RefreshSignal>;
pub type RefreshReceiver = mpsc::Receiver<RefreshSignal>;

/// Channel between the notifier and the exporter.
///
/// It holds at most one pending signal, the notifier waits while the exporter is scanning.
pub fn refresh_channel() -> (RefreshSender, RefreshReceiver) {
    mpsc::channel(1)
}

/// Stream of filesystem events of the watched paths.
pub struct FsEventSource {
    // Events are delivered only while the watcher is alive
    _watcher: Option<RecommendedWatcher>,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl FsEventSource {
    /// Starts watching the given paths (non-recursively).
    ///
    /// Fails if any of the paths cannot be watched, e.g. when it does not exist.
    pub fn watch(paths: &[PathBuf]) -> crate::Result<Self> {
        let (sender, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = sender.send(event);
        })
        .map_err(|source| AdapterError::WatchError {
            path: paths.first().cloned().unwrap_or_default(),
            source,
        })?;

        for path in paths {
            watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(|source| AdapterError::WatchError {
                    path: path.clone(),
                    source,
                })?;
            log::debug!("Watching {} for changes", path.display());
        }

        Ok(Self {
            _watcher: Some(watcher),
            events,
        })
    }

    /// Event source fed by an external channel instead of a filesystem watcher.
    pub fn from_channel(events: mpsc::UnboundedReceiver<notify::Result<Event>>) -> Self {
        Self {
            _watcher: None,
            events,
        }
    }

    async fn recv(&mut self) -> Option<notify::Result<Event>> {
        self.events.recv().await
    }
}

/// Produces [`RefreshSignal`]s on a fixed interval and whenever the Slurm configuration file
/// changes.
pub struct Notifier {
    ticker: Option<Interval>,
    fs_events: Option<FsEventSource>,
    config_file_name: String,
    // destination where notifications are sent
    dest: RefreshSender,
}

impl Notifier {
    /// A zero `interval` disables the periodic refresh. The first tick is due one `interval`
    /// after the notifier is created, not after it starts running, so a non-zero interval
    /// needs a Tokio runtime.
    pub fn new(
        interval: Duration,
        fs_events: Option<FsEventSource>,
        config_file_name: impl Into<String>,
        dest: RefreshSender,
    ) -> Self {
        Self {
            ticker: create_ticker(interval),
            fs_events,
            config_file_name: config_file_name.into(),
            dest,
        }
    }

    /// Runs until `token` is cancelled or the receiving side of the channel is closed.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let signal = tokio::select! {
                _ = token.cancelled() => break,
                _ = next_tick(&mut self.ticker) => {
                    log::trace!("Timer refresh received");
                    RefreshSignal::IntervalElapsed
                }
                event = next_fs_event(&mut self.fs_events) => match event {
                    Some(Ok(event)) => {
                        log::trace!("Filesystem event {:?} on {:?}", event.kind, event.paths);
                        if !self.is_config_change(&event) {
                            continue;
                        }
                        RefreshSignal::ConfigFileChanged
                    }
                    Some(Err(error)) => {
                        log::warn!("Filesystem watch error: {error}");
                        continue;
                    }
                    None => {
                        log::debug!("Filesystem events are no longer available");
                        self.fs_events = None;
                        continue;
                    }
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                result = self.dest.send(signal) => {
                    if result.is_err() {
                        log::debug!("Refresh signal receiver is gone");
                        break;
                    }
                }
            }
        }
        log::debug!("Change notifier stopped");
    }

    fn is_config_change(&self, event: &Event) -> bool {
        // Reading the file is not a change
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        event
            .paths
            .iter()
            .filter_map(|path| path.file_name())
            .any(|name| name == self.config_file_name.as_str())
    }
}

fn create_ticker(interval: Duration) -> Option<Interval> {
    if interval.is_zero() {
        return None;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_fs_event(source: &mut Option<FsEventSource>) -> Option<notify::Result<Event>> {
    match source {
        Some(source) => source.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use notify::{Event, EventKind};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{FsEventSource, Notifier, RefreshSignal, refresh_channel};
    use crate::common::error::AdapterError;

    fn modify_event(path: &str) -> notify::Result<Event> {
        Ok(Event::new(EventKind::Modify(ModifyKind::Any)).add_path(PathBuf::from(path)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_signals() {
        let (tx, mut rx) = refresh_channel();
        let token = CancellationToken::new();
        let notifier = Notifier::new(Duration::from_secs(60), None, "slurm.conf", tx);
        let handle = tokio::spawn(notifier.run(token.clone()));

        let start = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some(RefreshSignal::IntervalElapsed));
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(rx.recv().await, Some(RefreshSignal::IntervalElapsed));
        assert!(start.elapsed() >= Duration::from_secs(120));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_counts_from_creation() {
        let (tx, mut rx) = refresh_channel();
        let token = CancellationToken::new();
        let start = tokio::time::Instant::now();
        let notifier = Notifier::new(Duration::from_secs(60), None, "slurm.conf", tx);

        // Initial scan runs before the notifier is spawned
        tokio::time::sleep(Duration::from_secs(40)).await;
        let handle = tokio::spawn(notifier.run(token.clone()));

        assert_eq!(rx.recv().await, Some(RefreshSignal::IntervalElapsed));
        assert_eq!(start.elapsed(), Duration::from_secs(60));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_disables_timer() {
        let (tx, mut rx) = refresh_channel();
        let token = CancellationToken::new();
        let notifier = Notifier::new(Duration::ZERO, None, "slurm.conf", tx);
        let handle = tokio::spawn(notifier.run(token.clone()));

        let received = tokio::time::timeout(Duration::from_secs(3600), rx.recv()).await;
        assert!(received.is_err());

        token.cancel();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_only_config_file_events_signal() {
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = refresh_channel();
        let token = CancellationToken::new();
        let notifier = Notifier::new(
            Duration::ZERO,
            Some(FsEventSource::from_channel(fs_rx)),
            "slurm.conf",
            tx,
        );
        let handle = tokio::spawn(notifier.run(token.clone()));

        fs_tx.send(modify_event("/etc/slurm/gres.conf")).unwrap();
        fs_tx
            .send(Ok(Event::new(EventKind::Access(AccessKind::Any))
                .add_path(PathBuf::from("/etc/slurm/slurm.conf"))))
            .unwrap();
        fs_tx
            .send(Err(notify::Error::generic("watch overflow")))
            .unwrap();
        fs_tx.send(modify_event("/etc/slurm/slurm.conf")).unwrap();

        assert_eq!(rx.recv().await, Some(RefreshSignal::ConfigFileChanged));

        token.cancel();
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_one_signal_per_config_event() {
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = refresh_channel();
        let token = CancellationToken::new();
        let notifier = Notifier::new(
            Duration::ZERO,
            Some(FsEventSource::from_channel(fs_rx)),
            "slurm.conf",
            tx,
        );
        let handle = tokio::spawn(notifier.run(token.clone()));

        for _ in 0..3 {
            fs_tx.send(modify_event("/etc/slurm/slurm.conf")).unwrap();
        }
        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(RefreshSignal::ConfigFileChanged));
        }
        // Closing the event source does not stop the notifier
        drop(fs_tx);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(!handle.is_finished());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_receiver_is_dropped() {
        let (tx, rx) = refresh_channel();
        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let notifier = Notifier::new(
            Duration::ZERO,
            Some(FsEventSource::from_channel(fs_rx)),
            "slurm.conf",
            tx,
        );
        let handle = tokio::spawn(notifier.run(CancellationToken::new()));
        drop(rx);
        fs_tx.send(modify_event("/etc/slurm/slurm.conf")).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_missing_path_fails() {
        let dir = tempfile::TempDir::with_prefix("slurm-adapter").unwrap();
        let missing = dir.path().join("missing");
        match FsEventSource::watch(&[missing.clone()]) {
            Err(AdapterError::WatchError { path, .. }) => assert_eq!(path, missing),
            Err(error) => panic!("Unexpected error {error:?}"),
            Ok(_) => panic!("Watching a missing path should fail"),
        }
    }

    #[tokio::test]
    async fn test_watch_config_file_in_directory() {
        let dir = tempfile::TempDir::with_prefix("slurm-adapter").unwrap();
        let source = FsEventSource::watch(&[dir.path().to_path_buf()]).unwrap();
        let (tx, mut rx) = refresh_channel();
        let token = CancellationToken::new();
        let notifier = Notifier::new(Duration::ZERO, Some(source), "slurm.conf", tx);
        let handle = tokio::spawn(notifier.run(token.clone()));

        std::fs::write(dir.path().join("cgroup.conf"), "CgroupPlugin=autodetect\n").unwrap();
        std::fs::write(dir.path().join("slurm.conf"), "ClusterName=test\n").unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap();
        assert_eq!(signal, Some(RefreshSignal::ConfigFileChanged));

        token.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_create_event_is_a_change() {
        let (tx, _rx) = refresh_channel();
        let notifier = Notifier::new(Duration::ZERO, None, "slurm.conf", tx);
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/slurm/slurm.conf"));
        assert!(notifier.is_config_change(&event));
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/slurm/slurm.conf.bak"));
        assert!(!notifier.is_config_change(&event));
    }
}
