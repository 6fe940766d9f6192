use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use wisp_core::Route;

/// Hard ceiling on any configured build timeout.
pub const MAX_BUILD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Build timeout when the manifest does not configure one.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(2 * 60);

// ---------------------------------------------------------------------------
// BuildState / BuildOptions
// ---------------------------------------------------------------------------

/// Per-route build flag. `Idle -> InProgress -> Idle`; there is no failed
/// terminal state — a failed build returns to `Idle` and is eligible for
/// the next trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    InProgress,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// How often the watcher rescans a route's source tree.
    pub poll_interval: Duration,
    /// Pause after build completion before rebuild triggers re-arm.
    /// Absorbs filesystem events generated by the build's own writes.
    pub quiescence: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            quiescence: Duration::from_millis(500),
        }
    }
}

// ---------------------------------------------------------------------------
// BuildCoordinator
// ---------------------------------------------------------------------------

/// Handle to one route's build task.
pub struct BuildHandle {
    /// Feed a filesystem change event to the build task. The production
    /// watcher sends on a clone of this; tests can send directly.
    pub changes: mpsc::Sender<()>,
    /// Observe state transitions. Read-only; the build task owns the state.
    pub state: watch::Receiver<BuildState>,
}

/// Owns the build lifecycle for all routes that declare a build step.
pub struct BuildCoordinator {
    options: BuildOptions,
}

impl BuildCoordinator {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    /// Register a route with the coordinator.
    ///
    /// Routes without a build command get no build task and no watcher;
    /// `None` is returned for them. Otherwise this spawns a per-route build
    /// task (which immediately runs one initial build) and a recursive
    /// watcher over the route's source tree.
    pub fn register(&self, route: &Route) -> Option<BuildHandle> {
        let command = route.build_command.clone()?;

        let (change_tx, change_rx) = mpsc::channel(64);
        // The initial build starts as soon as the task is spawned.
        let (state_tx, state_rx) = watch::channel(BuildState::InProgress);

        let task = RouteBuild {
            route_path: route.route_path.clone(),
            source_dir: route.source_dir.clone(),
            command,
            timeout: effective_timeout(route.timeout),
            quiescence: self.options.quiescence,
            changes: change_rx,
            state: state_tx,
        };
        tokio::spawn(task.run());

        tokio::spawn(watch_tree(
            route.source_dir.clone(),
            self.options.poll_interval,
            change_tx.clone(),
        ));

        Some(BuildHandle {
            changes: change_tx,
            state: state_rx,
        })
    }
}

/// `min(configured, 15 min)`, defaulting to 2 min when unconfigured.
fn effective_timeout(configured: Option<Duration>) -> Duration {
    configured
        .map(|t| t.min(MAX_BUILD_TIMEOUT))
        .unwrap_or(DEFAULT_BUILD_TIMEOUT)
}

// ---------------------------------------------------------------------------
// RouteBuild — the per-route task
// ---------------------------------------------------------------------------

/// One route's build state machine. The task owns the `BuildState`
/// exclusively; watchers and tests talk to it only through the change
/// channel, so no two builds for the same route can ever be in flight.
struct RouteBuild {
    route_path: String,
    source_dir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
    quiescence: Duration,
    changes: mpsc::Receiver<()>,
    state: watch::Sender<BuildState>,
}

impl RouteBuild {
    async fn run(mut self) {
        // Initial build on registration.
        self.execute_build().await;

        while self.changes.recv().await.is_some() {
            self.execute_build().await;
        }
    }

    /// One full build cycle: `InProgress` → run → quiescence → drain →
    /// `Idle`. Change events arriving mid-cycle queue on the channel and
    /// are drained before re-arming — they trigger nothing.
    async fn execute_build(&mut self) {
        let _ = self.state.send(BuildState::InProgress);

        self.run_build_command().await;

        tokio::time::sleep(self.quiescence).await;
        while self.changes.try_recv().is_ok() {}

        let _ = self.state.send(BuildState::Idle);
    }

    async fn run_build_command(&self) {
        info!(route = %self.route_path, command = ?self.command, "build started");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(&self.source_dir)
            .kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                warn!(route = %self.route_path, timeout = ?self.timeout, "build timed out");
            }
            Ok(Err(e)) => {
                warn!(route = %self.route_path, error = %e, "build failed to start");
            }
            Ok(Ok(output)) if !output.status.success() => {
                warn!(
                    route = %self.route_path,
                    code = output.status.code().unwrap_or(-1),
                    stdout = %String::from_utf8_lossy(&output.stdout),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "build failed"
                );
            }
            Ok(Ok(_)) => {
                info!(route = %self.route_path, "build succeeded");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Watcher
// ---------------------------------------------------------------------------

/// Poll-based recursive watcher: rescan the tree and send one change event
/// per scan whose signature differs from the previous one.
async fn watch_tree(dir: PathBuf, poll_interval: Duration, changes: mpsc::Sender<()>) {
    let mut baseline = scan_tree(&dir);
    loop {
        tokio::time::sleep(poll_interval).await;
        let current = scan_tree(&dir);
        if current != baseline {
            baseline = current;
            if changes.send(()).await.is_err() {
                return; // build task is gone
            }
        }
    }
}

/// Signature of a directory tree: path → (mtime, size) for every file.
fn scan_tree(dir: &Path) -> BTreeMap<PathBuf, (SystemTime, u64)> {
    let mut signature = BTreeMap::new();
    collect_files(dir, &mut signature);
    signature
}

fn collect_files(dir: &Path, signature: &mut BTreeMap<PathBuf, (SystemTime, u64)>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, signature);
        } else if let Ok(meta) = entry.metadata() {
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            signature.insert(path, (mtime, meta.len()));
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Options that keep the production watcher out of the way so tests
    /// drive change events through the handle deterministically.
    fn test_options() -> BuildOptions {
        BuildOptions {
            poll_interval: Duration::from_secs(3600),
            quiescence: Duration::from_millis(50),
        }
    }

    /// A route whose "build" appends a line to `log` in its source dir.
    fn marker_route(dir: &TempDir, build: Option<&str>) -> Route {
        Route {
            route_path: "/demo/hello".into(),
            source_dir: dir.path().to_path_buf(),
            entry_module: "index".into(),
            main_export: "main".into(),
            runtime: "nodejs:18".into(),
            timeout: None,
            build_command: build.map(|s| vec!["sh".into(), "-c".into(), s.into()]),
        }
    }

    fn log_lines(dir: &TempDir) -> usize {
        std::fs::read_to_string(dir.path().join("log"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    async fn wait_idle(state: &mut watch::Receiver<BuildState>) {
        tokio::time::timeout(Duration::from_secs(10), async {
            state
                .wait_for(|s| *s == BuildState::Idle)
                .await
                .expect("build task dropped its state channel");
        })
        .await
        .expect("timed out waiting for Idle");
    }

    /// Wait until the marker file reaches `n` lines, then until the cycle
    /// re-arms. Waiting on the side effect avoids racing a fast cycle's
    /// `InProgress` window.
    async fn wait_for_build(dir: &TempDir, n: usize, state: &mut watch::Receiver<BuildState>) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while log_lines(dir) < n {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("timed out waiting for build marker");
        wait_idle(state).await;
    }

    #[tokio::test]
    async fn no_build_step_means_no_task() {
        let dir = TempDir::new().unwrap();
        let coordinator = BuildCoordinator::new(test_options());
        assert!(coordinator.register(&marker_route(&dir, None)).is_none());
    }

    #[tokio::test]
    async fn initial_build_runs_on_register() {
        let dir = TempDir::new().unwrap();
        let coordinator = BuildCoordinator::new(test_options());
        let mut handle = coordinator
            .register(&marker_route(&dir, Some("echo built >> log")))
            .unwrap();

        // Registration immediately starts the initial build.
        assert_eq!(*handle.state.borrow(), BuildState::InProgress);
        wait_idle(&mut handle.state).await;
        assert_eq!(log_lines(&dir), 1);
    }

    #[tokio::test]
    async fn change_event_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let coordinator = BuildCoordinator::new(test_options());
        let mut handle = coordinator
            .register(&marker_route(&dir, Some("echo built >> log")))
            .unwrap();

        wait_idle(&mut handle.state).await;
        handle.changes.send(()).await.unwrap();
        wait_for_build(&dir, 2, &mut handle.state).await;
        assert_eq!(log_lines(&dir), 2);
    }

    #[tokio::test]
    async fn events_during_build_are_dropped() {
        let dir = TempDir::new().unwrap();
        let coordinator = BuildCoordinator::new(test_options());
        // Slow enough that the events below land while the initial build
        // is still in progress.
        let mut handle = coordinator
            .register(&marker_route(&dir, Some("sleep 0.3; echo built >> log")))
            .unwrap();

        for _ in 0..5 {
            handle.changes.send(()).await.unwrap();
        }

        wait_idle(&mut handle.state).await;
        // Give a spurious rebuild a moment to start if one was queued.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*handle.state.borrow(), BuildState::Idle);
        assert_eq!(log_lines(&dir), 1);

        // The route is still live: a fresh event triggers exactly one more.
        handle.changes.send(()).await.unwrap();
        wait_for_build(&dir, 2, &mut handle.state).await;
        assert_eq!(log_lines(&dir), 2);
    }

    #[tokio::test]
    async fn failed_build_returns_to_idle_and_stays_eligible() {
        let dir = TempDir::new().unwrap();
        let coordinator = BuildCoordinator::new(test_options());
        let mut handle = coordinator
            .register(&marker_route(&dir, Some("echo built >> log; exit 1")))
            .unwrap();

        wait_idle(&mut handle.state).await;
        assert_eq!(log_lines(&dir), 1);

        handle.changes.send(()).await.unwrap();
        wait_for_build(&dir, 2, &mut handle.state).await;
        assert_eq!(log_lines(&dir), 2);
    }

    #[tokio::test]
    async fn timed_out_build_is_killed_and_returns_to_idle() {
        let dir = TempDir::new().unwrap();
        let coordinator = BuildCoordinator::new(test_options());
        let mut route = marker_route(&dir, Some("sleep 30; echo built >> log"));
        route.timeout = Some(Duration::from_millis(200));
        let mut handle = coordinator.register(&route).unwrap();

        wait_idle(&mut handle.state).await;
        assert_eq!(log_lines(&dir), 0);
    }

    #[tokio::test]
    async fn watcher_detects_source_changes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.js"), "// v1").unwrap();

        let coordinator = BuildCoordinator::new(BuildOptions {
            poll_interval: Duration::from_millis(50),
            quiescence: Duration::from_millis(100),
        });
        // Build writes outside the watched tree to keep the cycle count
        // driven purely by the explicit edit below.
        let log = dir.path().join("log");
        let route = Route {
            route_path: "/demo/watched".into(),
            source_dir: dir.path().join("src"),
            entry_module: "index".into(),
            main_export: "main".into(),
            runtime: "nodejs:18".into(),
            timeout: None,
            build_command: Some(vec![
                "sh".into(),
                "-c".into(),
                format!("echo built >> {}", log.display()),
            ]),
        };
        let mut handle = coordinator.register(&route).unwrap();

        wait_idle(&mut handle.state).await;
        let after_initial = std::fs::read_to_string(&log).unwrap().lines().count();
        assert_eq!(after_initial, 1);

        // Edit a nested source file; the recursive watcher must notice.
        std::fs::write(dir.path().join("src/index.js"), "// v2 with more bytes").unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let lines = std::fs::read_to_string(&log)
                    .map(|s| s.lines().count())
                    .unwrap_or(0);
                if lines >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("watcher never triggered a rebuild");
        wait_idle(&mut handle.state).await;
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 2);
    }

    #[test]
    fn effective_timeout_bounds() {
        assert_eq!(effective_timeout(None), DEFAULT_BUILD_TIMEOUT);
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(10))),
            Duration::from_secs(10)
        );
        assert_eq!(
            effective_timeout(Some(Duration::from_secs(60 * 60))),
            MAX_BUILD_TIMEOUT
        );
    }
}
