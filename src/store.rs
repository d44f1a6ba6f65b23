use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::cache::SnapshotCache;
use crate::config::ScanConfig;
use crate::scan::CommandRunner;
use crate::scanner::{ScanServers, ServerScanner};
use crate::types::DiscoveredServer;

type Terminator = Box<dyn Fn(i32) -> eyre::Result<()> + Send + Sync>;

/// Immutable view of the store published to observers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub servers: Vec<DiscoveredServer>,
    pub is_refreshing: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    /// Pids signalled but not yet confirmed gone by a later scan
    pub terminating: BTreeSet<i32>,
}

impl StoreSnapshot {
    pub fn primary_servers(&self) -> Vec<&DiscoveredServer> {
        self.servers.iter().filter(|s| !s.is_system_process()).collect()
    }

    pub fn system_servers(&self) -> Vec<&DiscoveredServer> {
        self.servers.iter().filter(|s| s.is_system_process()).collect()
    }
}

#[derive(Debug, Default)]
struct ScanControl {
    refreshing: bool,
    /// Sequence number of the most recently started scan
    scan_seq: u64,
    /// pid -> scan_seq at the moment the kill was issued
    pending_kills: HashMap<i32, u64>,
}

struct StoreInner {
    scanner: Arc<dyn ScanServers>,
    cache: SnapshotCache,
    kill_rescan_delay: Duration,
    terminator: Terminator,
    control: Mutex<ScanControl>,
    state: watch::Sender<StoreSnapshot>,
}

/// Owns the latest scan result and publishes it as whole snapshots.
///
/// Cloning is cheap and every clone drives the same store.
#[derive(Clone)]
pub struct ServerStore {
    inner: Arc<StoreInner>,
}

impl ServerStore {
    /// Create a store seeded from the cached snapshot that signals with SIGTERM
    pub fn new(scanner: Arc<dyn ScanServers>, cache: SnapshotCache, kill_rescan_delay: Duration) -> Self {
        Self::with_terminator(scanner, cache, kill_rescan_delay, crate::process::terminate)
    }

    /// Like [`ServerStore::new`] but with a custom way of signalling processes
    pub fn with_terminator(
        scanner: Arc<dyn ScanServers>,
        cache: SnapshotCache,
        kill_rescan_delay: Duration,
        terminator: impl Fn(i32) -> eyre::Result<()> + Send + Sync + 'static,
    ) -> Self {
        let cached = cache.load_servers();
        log::debug!("[store] new: cached_servers={} cache={:?}", cached.len(), cache.path());

        let (state, _) = watch::channel(StoreSnapshot {
            servers: cached,
            ..StoreSnapshot::default()
        });

        Self {
            inner: Arc::new(StoreInner {
                scanner,
                cache,
                kill_rescan_delay,
                terminator: Box::new(terminator),
                control: Mutex::new(ScanControl::default()),
                state,
            }),
        }
    }

    pub fn from_config(config: &ScanConfig, runner: Arc<dyn CommandRunner>) -> eyre::Result<Self> {
        let scanner = ServerScanner::from_config(config, runner)?;
        let cache = SnapshotCache::new(config.cache_file.clone());
        Ok(Self::new(Arc::new(scanner), cache, config.kill_rescan_delay))
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.inner.state.subscribe()
    }

    /// Start a background scan; false if one is already running
    pub fn refresh(&self) -> bool {
        let Some(seq) = self.inner.begin_scan() else {
            return false;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_scan(seq).await;
        });
        true
    }

    /// Scan in the current task; false if another scan was already running
    pub async fn refresh_and_wait(&self) -> bool {
        let Some(seq) = self.inner.begin_scan() else {
            return false;
        };
        self.inner.run_scan(seq).await;
        true
    }

    /// Terminate a process and drop its servers right away; a rescan confirms later
    pub fn kill(&self, pid: i32) {
        if let Err(e) = (self.inner.terminator)(pid) {
            log::warn!("[store] terminate_failed: pid={} error={}", pid, e);
        }

        {
            let mut control = self.inner.lock_control();
            let seq = control.scan_seq;
            control.pending_kills.insert(pid, seq);
            let mut servers = Vec::new();
            self.inner.state.send_modify(|state| {
                state.servers.retain(|s| s.pid != pid);
                state.terminating.insert(pid);
                servers = state.servers.clone();
            });
            log::debug!("[store] kill: pid={} remaining={}", pid, servers.len());
            // saved under the lock so the file follows publish order
            self.inner.cache.save_servers(&servers);
        }

        let store = self.clone();
        let delay = self.inner.kill_rescan_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            store.confirm_kill(pid).await;
        });
    }

    /// Start a scan once none is in flight, so one begins after the kill
    async fn confirm_kill(&self, pid: i32) {
        let mut rx = self.subscribe();
        while !self.refresh() {
            log::debug!("[store] confirm_rescan_deferred: pid={} reason=scan_in_flight", pid);
            if rx.wait_for(|s| !s.is_refreshing).await.is_err() {
                return;
            }
        }
        log::debug!("[store] confirm_rescan_started: pid={}", pid);
    }
}

impl StoreInner {
    fn lock_control(&self) -> MutexGuard<'_, ScanControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_scan(&self) -> Option<u64> {
        let seq = {
            let mut control = self.lock_control();
            if control.refreshing {
                log::debug!("[store] refresh_ignored: scan_seq={} reason=already_refreshing", control.scan_seq);
                return None;
            }
            control.refreshing = true;
            control.scan_seq += 1;
            // published under the lock so is_refreshing never lags the guard
            self.state.send_modify(|state| state.is_refreshing = true);
            control.scan_seq
        };
        log::debug!("[store] refresh_started: scan_seq={}", seq);
        Some(seq)
    }

    async fn run_scan(&self, seq: u64) {
        let start = Instant::now();
        let latest = self.scanner.find_web_servers().await;

        {
            let mut control = self.lock_control();
            // kills issued before this scan began are confirmed by it
            control.pending_kills.retain(|_, issued_at| *issued_at >= seq);
            let terminating: BTreeSet<i32> = control.pending_kills.keys().copied().collect();
            let servers: Vec<DiscoveredServer> = latest
                .into_iter()
                .filter(|s| !terminating.contains(&s.pid))
                .collect();
            control.refreshing = false;

            log::info!("[store] refresh_completed: scan_seq={} servers={} duration={}ms",
                seq, servers.len(), start.elapsed().as_millis());
            // saved under the lock so the file follows publish order
            self.cache.save_servers(&servers);
            self.state.send_modify(|state| {
                state.servers = servers;
                state.is_refreshing = false;
                state.last_refresh = Some(Utc::now());
                state.terminating = terminating;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scheme;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    const LONG_DELAY: Duration = Duration::from_secs(3600);

    /// Hands out queued results, each scan waiting for a permit first
    struct ScriptedScanner {
        results: Mutex<VecDeque<Vec<DiscoveredServer>>>,
        gate: Semaphore,
        calls: AtomicUsize,
    }

    impl ScriptedScanner {
        fn new(results: Vec<Vec<DiscoveredServer>>, open: bool) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                gate: Semaphore::new(if open { Semaphore::MAX_PERMITS } else { 0 }),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ScanServers for ScriptedScanner {
        async fn find_web_servers(&self) -> Vec<DiscoveredServer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
            self.results.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    fn server(pid: i32, port: u16, path: Option<&str>) -> DiscoveredServer {
        DiscoveredServer {
            pid,
            process_name: "node".to_string(),
            port,
            scheme: Scheme::Http,
            page_title: None,
            executable_path: path.map(String::from),
        }
    }

    fn temp_cache(name: &str) -> (SnapshotCache, PathBuf) {
        let dir = std::env::temp_dir().join(format!("garcon-store-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        (SnapshotCache::new(Some(dir.join("cache.json"))), dir)
    }

    async fn wait_until(store: &ServerStore, predicate: impl Fn(&StoreSnapshot) -> bool) -> StoreSnapshot {
        let mut rx = store.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
            .await
            .expect("store never reached expected state")
            .expect("store dropped");
        snapshot.clone()
    }

    #[tokio::test]
    async fn test_starts_from_cached_snapshot() {
        let (cache, dir) = temp_cache("seed");
        cache.save_servers(&[server(9, 8080, None)]);

        let store = ServerStore::new(ScriptedScanner::new(vec![], true), cache, LONG_DELAY);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.servers, vec![server(9, 8080, None)]);
        assert!(!snapshot.is_refreshing);
        assert!(snapshot.last_refresh.is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_refresh_replaces_state_and_persists() {
        let (cache, dir) = temp_cache("refresh");
        let scanner = ScriptedScanner::new(vec![vec![server(1, 3000, None), server(2, 22, Some("/usr/sbin/sshd"))]], true);
        let store = ServerStore::new(scanner, cache.clone(), LONG_DELAY);

        assert!(store.refresh_and_wait().await);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.servers.len(), 2);
        assert!(!snapshot.is_refreshing);
        assert!(snapshot.last_refresh.is_some());
        assert_eq!(snapshot.primary_servers(), vec![&server(1, 3000, None)]);
        assert_eq!(snapshot.system_servers(), vec![&server(2, 22, Some("/usr/sbin/sshd"))]);
        assert_eq!(cache.load_servers(), snapshot.servers);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_refresh_is_not_reentrant() {
        let scanner = ScriptedScanner::new(vec![vec![server(1, 3000, None)]], false);
        let store = ServerStore::new(scanner.clone(), SnapshotCache::disabled(), LONG_DELAY);

        assert!(store.refresh());
        assert!(store.snapshot().is_refreshing);
        assert!(!store.refresh());
        assert!(!store.refresh_and_wait().await);

        scanner.gate.add_permits(1);
        let snapshot = wait_until(&store, |s| !s.is_refreshing).await;
        assert_eq!(snapshot.servers.len(), 1);
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_kill_removes_pid_immediately_then_rescans() {
        let (cache, dir) = temp_cache("kill");
        cache.save_servers(&[server(5, 3000, None), server(5, 3001, None), server(6, 4000, None)]);
        let scanner = ScriptedScanner::new(vec![vec![server(6, 4000, None)]], true);
        let killed = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&killed);
        let store = ServerStore::with_terminator(scanner.clone(), cache.clone(), Duration::from_millis(10), move |pid| {
            recorder.lock().unwrap().push(pid);
            Ok(())
        });

        store.kill(5);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.servers, vec![server(6, 4000, None)]);
        assert!(snapshot.terminating.contains(&5));
        assert_eq!(*killed.lock().unwrap(), vec![5]);
        assert_eq!(cache.load_servers(), vec![server(6, 4000, None)]);

        let snapshot = wait_until(&store, |s| s.last_refresh.is_some()).await;
        assert!(snapshot.terminating.is_empty());
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_kill_failure_still_removes_optimistically() {
        let store = ServerStore::with_terminator(ScriptedScanner::new(vec![], true), SnapshotCache::disabled(), LONG_DELAY, |pid| {
            Err(eyre::eyre!("no such process {}", pid))
        });
        store.inner.state.send_modify(|s| s.servers = vec![server(5, 3000, None)]);

        store.kill(5);
        assert!(store.snapshot().servers.is_empty());
    }

    #[tokio::test]
    async fn test_kill_during_scan_stays_tentative_until_next_scan() {
        let scanner = ScriptedScanner::new(
            vec![
                vec![server(5, 3000, None), server(6, 4000, None)],
                vec![server(5, 3000, None), server(6, 4000, None)],
            ],
            false,
        );
        let store = ServerStore::with_terminator(scanner.clone(), SnapshotCache::disabled(), LONG_DELAY, |_| Ok(()));

        assert!(store.refresh());
        store.kill(5);
        scanner.gate.add_permits(1);

        // the in-flight scan started before the kill, so it cannot confirm it
        let snapshot = wait_until(&store, |s| s.last_refresh.is_some()).await;
        assert_eq!(snapshot.servers, vec![server(6, 4000, None)]);
        assert!(snapshot.terminating.contains(&5));

        // a scan started after the kill is authoritative: the process survived
        scanner.gate.add_permits(1);
        assert!(store.refresh_and_wait().await);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.servers.len(), 2);
        assert!(snapshot.terminating.is_empty());
    }

    #[tokio::test]
    async fn test_kill_during_scan_rescans_once_scan_finishes() {
        let (cache, dir) = temp_cache("kill-during-scan");
        let scanner = ScriptedScanner::new(
            vec![
                vec![server(5, 3000, None), server(6, 4000, None)],
                vec![server(5, 3000, None), server(6, 4000, None)],
            ],
            false,
        );
        let store = ServerStore::with_terminator(scanner.clone(), cache.clone(), Duration::from_millis(10), |_| Ok(()));

        assert!(store.refresh());
        store.kill(5);
        // the delayed rescan fires while the first scan is still blocked
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 1);
        scanner.gate.add_permits(2);

        let snapshot = wait_until(&store, |s| s.last_refresh.is_some() && s.terminating.is_empty()).await;
        assert_eq!(scanner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(snapshot.servers, vec![server(5, 3000, None), server(6, 4000, None)]);
        assert!(!snapshot.is_refreshing);
        assert_eq!(cache.load_servers(), snapshot.servers);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_terminator_survives_clone() {
        let killed = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&killed);
        let store = ServerStore::with_terminator(ScriptedScanner::new(vec![], true), SnapshotCache::disabled(), LONG_DELAY, move |pid| {
            recorder.lock().unwrap().push(pid);
            Ok(())
        });
        let _observer = store.clone();

        store.clone().kill(7);
        store.kill(8);
        assert_eq!(*killed.lock().unwrap(), vec![7, 8]);
    }
}
