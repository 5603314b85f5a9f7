//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Outstanding command tracker with timeout sweep."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Bookkeeping for forwarded select/operate commands awaiting confirmation.
//!
//! An entry is created when a command is forwarded and removed either by a
//! confirming telemetry record for the same point or by the periodic sweep
//! once its deadline has passed. Expiry is advisory: it is logged and
//! counted, nothing is cancelled.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use r_ems_common::time::epoch_millis;
use r_ems_metrics::Tase2Metrics;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingCommand {
    pub domain: String,
    pub label: String,
    pub select: bool,
    /// Wall-clock creation time, epoch milliseconds.
    pub created_ms: u64,
    created_at: Instant,
    deadline: Instant,
}

impl OutstandingCommand {
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn has_timed_out(&self, now: Instant) -> bool {
        now > self.deadline
    }
}

type CommandKey = (String, String);

fn key(domain: &str, label: &str) -> CommandKey {
    (domain.to_owned(), label.to_owned())
}

/// Pending commands keyed by `(domain, label)`, oldest first per key.
#[derive(Debug)]
pub struct OutstandingCommands {
    timeout: Duration,
    entries: Mutex<HashMap<CommandKey, VecDeque<OutstandingCommand>>>,
    metrics: Option<Tase2Metrics>,
}

impl OutstandingCommands {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Tase2Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn insert(&self, domain: &str, label: &str, select: bool) {
        self.insert_at(domain, label, select, Instant::now());
    }

    pub fn insert_at(&self, domain: &str, label: &str, select: bool, now: Instant) {
        let command = OutstandingCommand {
            domain: domain.to_owned(),
            label: label.to_owned(),
            select,
            created_ms: epoch_millis(),
            created_at: now,
            deadline: now + self.timeout,
        };
        let pending = {
            let mut entries = self.entries.lock();
            entries
                .entry(key(domain, label))
                .or_default()
                .push_back(command);
            Self::count(&entries)
        };
        debug!(domain = %domain, point = %label, select, pending, "outstanding command added");
        self.publish(pending);
    }

    /// Remove the oldest entry for `(domain, label)`.
    pub fn confirm(&self, domain: &str, label: &str) -> Option<OutstandingCommand> {
        let (confirmed, pending) = {
            let mut entries = self.entries.lock();
            let key = key(domain, label);
            let confirmed = entries.get_mut(&key).and_then(VecDeque::pop_front);
            if entries.get(&key).is_some_and(VecDeque::is_empty) {
                entries.remove(&key);
            }
            (confirmed, Self::count(&entries))
        };
        if let Some(command) = &confirmed {
            debug!(domain = %domain, point = %label, select = command.select, "outstanding command confirmed");
            self.publish(pending);
        }
        confirmed
    }

    /// Remove and return every entry whose deadline lies before `now`.
    pub fn sweep_at(&self, now: Instant) -> Vec<OutstandingCommand> {
        let (expired, pending) = {
            let mut entries = self.entries.lock();
            let mut expired = Vec::new();
            entries.retain(|_, queue| {
                queue.retain(|command| {
                    if command.has_timed_out(now) {
                        expired.push(command.clone());
                        false
                    } else {
                        true
                    }
                });
                !queue.is_empty()
            });
            (expired, Self::count(&entries))
        };

        for command in &expired {
            warn!(
                domain = %command.domain,
                point = %command.label,
                select = command.select,
                timeout_ms = self.timeout.as_millis() as u64,
                "outstanding command timed out without confirmation"
            );
        }
        if !expired.is_empty() {
            if let Some(metrics) = &self.metrics {
                metrics.record_expired(expired.len());
            }
            self.publish(pending);
        }
        expired
    }

    pub fn sweep(&self) -> Vec<OutstandingCommand> {
        self.sweep_at(Instant::now())
    }

    /// Entries pending for one point.
    pub fn pending(&self, domain: &str, label: &str) -> usize {
        self.entries
            .lock()
            .get(&key(domain, label))
            .map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        Self::count(&self.entries.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.publish(0);
    }

    fn count(entries: &HashMap<CommandKey, VecDeque<OutstandingCommand>>) -> usize {
        entries.values().map(VecDeque::len).sum()
    }

    fn publish(&self, pending: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_outstanding(pending);
        }
    }
}

/// Handle to the periodic sweep task.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the task and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            warn!(error = %err, "outstanding command sweep task ended abnormally");
        }
    }
}

/// Spawn the sweep loop on the current tokio runtime.
pub fn spawn_sweeper(tracker: Arc<OutstandingCommands>, period: Duration) -> SweepHandle {
    let (shutdown, mut shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("outstanding command sweep stopped");
                    break;
                }
                _ = ticker.tick() => {
                    tracker.sweep();
                }
            }
        }
    });
    SweepHandle { shutdown, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r_ems_metrics::new_registry;
    use std::io;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn confirm_removes_first_match_only() {
        let tracker = OutstandingCommands::new(TIMEOUT);
        let now = Instant::now();
        tracker.insert_at("icc1", "cmd1", true, now);
        tracker.insert_at("icc1", "cmd1", false, now + Duration::from_millis(10));
        tracker.insert_at("icc1", "cmd2", false, now);
        assert_eq!(tracker.len(), 3);

        let first = tracker.confirm("icc1", "cmd1").unwrap();
        assert!(first.select);
        assert_eq!(tracker.pending("icc1", "cmd1"), 1);
        assert!(!tracker.confirm("icc1", "cmd1").unwrap().select);
        assert!(tracker.confirm("icc1", "cmd1").is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn confirm_matches_domain_and_label() {
        let tracker = OutstandingCommands::new(TIMEOUT);
        tracker.insert("icc1", "cmd1", true);
        assert!(tracker.confirm("icc2", "cmd1").is_none());
        assert!(tracker.confirm("icc1", "cmd").is_none());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn sweep_expires_strictly_after_deadline() {
        let tracker = OutstandingCommands::new(TIMEOUT);
        let t0 = Instant::now();
        tracker.insert_at("icc1", "cmd1", true, t0);
        tracker.insert_at("vcc", "cmd2", false, t0 + Duration::from_secs(2));

        assert!(tracker.sweep_at(t0 + Duration::from_secs(4)).is_empty());
        assert!(tracker.sweep_at(t0 + TIMEOUT).is_empty());

        let expired = tracker.sweep_at(t0 + TIMEOUT + Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].label, "cmd1");
        assert_eq!(expired[0].deadline(), t0 + TIMEOUT);

        assert!(tracker
            .sweep_at(t0 + TIMEOUT + Duration::from_millis(2))
            .is_empty());
        assert_eq!(tracker.sweep_at(t0 + Duration::from_secs(8)).len(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn expiry_is_logged_once_per_command() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .finish();

        let tracker = OutstandingCommands::new(TIMEOUT);
        let t0 = Instant::now();
        tracker.insert_at("icc1", "cmd1", true, t0);
        tracing::subscriber::with_default(subscriber, || {
            for step in 1..=4 {
                tracker.sweep_at(t0 + TIMEOUT + Duration::from_millis(step));
            }
        });

        let output = logs.contents();
        assert_eq!(
            output
                .matches("outstanding command timed out without confirmation")
                .count(),
            1,
            "{output}"
        );
        assert!(output.contains("cmd1"));
    }

    #[test]
    fn metrics_follow_tracker() {
        let registry = new_registry();
        let metrics = Tase2Metrics::new(registry.clone()).unwrap();
        let tracker = OutstandingCommands::new(TIMEOUT).with_metrics(Some(metrics));
        let t0 = Instant::now();
        tracker.insert_at("icc1", "a", true, t0);
        tracker.insert_at("icc1", "b", true, t0);
        tracker.sweep_at(t0 + Duration::from_secs(6));

        let families = registry.gather();
        let value = |name: &str| {
            families
                .iter()
                .find(|family| family.get_name() == name)
                .map(|family| &family.get_metric()[0])
                .cloned()
                .unwrap()
        };
        assert_eq!(
            value("r_ems_tase2_outstanding_expired_total")
                .get_counter()
                .get_value(),
            2.0
        );
        assert_eq!(
            value("r_ems_tase2_outstanding_commands")
                .get_gauge()
                .get_value(),
            0.0
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweeper_task_expires_entries_and_stops() {
        let tracker = Arc::new(OutstandingCommands::new(Duration::from_millis(30)));
        tracker.insert("icc1", "cmd1", true);
        let handle = spawn_sweeper(tracker.clone(), Duration::from_millis(5));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(tracker.is_empty());

        handle.shutdown().await;
        tracker.insert("icc1", "cmd1", true);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tracker.len(), 1);
    }
}
