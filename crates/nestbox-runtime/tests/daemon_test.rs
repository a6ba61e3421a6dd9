//! Integration tests driving a real accept loop over a UNIX socket.
//!
//! Workers are replaced by a loopback launcher that registers fake pids
//! through the client, exactly like a real worker reports back. Process
//! and mount control are recorded instead of executed, so nothing here
//! needs root or touches real processes.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nestbox_common::error::Result;
use nestbox_common::types::{ContainerId, MountRequest};
use nestbox_core::filesystem::mount::MountOps;
use nestbox_core::process::{InitExit, ProcessControl};
use nestbox_runtime::client::{Client, CreateOutcome, KillOutcome};
use nestbox_runtime::daemon;
use nestbox_runtime::orchestrator::Orchestrator;
use nestbox_runtime::spec::{ContainerSpec, CreationSpec};
use nestbox_runtime::worker::WorkerLauncher;
use nix::unistd::Pid;

const WAIT: Duration = Duration::from_secs(5);

/// Registers each creation from its own thread with a made-up pid.
struct LoopbackLauncher {
    client: Client,
    next_pid: Arc<AtomicI32>,
}

impl WorkerLauncher for LoopbackLauncher {
    fn launch(&mut self, spec: CreationSpec) -> Result<()> {
        let client = self.client.clone();
        let pid = Pid::from_raw(self.next_pid.fetch_add(1, Ordering::SeqCst));
        let _ = thread::spawn(move || client.register(pid, &spec.id, &spec.container).unwrap());
        Ok(())
    }
}

#[derive(Default)]
struct RecordedKills(Mutex<Vec<Pid>>);

impl ProcessControl for RecordedKills {
    fn kill(&self, pid: Pid) -> Result<()> {
        self.0.lock().unwrap().push(pid);
        Ok(())
    }

    fn wait_exit(&self, _pid: Pid) -> Result<InitExit> {
        Ok(InitExit::Exited(0))
    }
}

#[derive(Default)]
struct RecordedUnmounts(Mutex<Vec<PathBuf>>);

impl MountOps for RecordedUnmounts {
    fn force_unmount(&self, target: &Path) {
        self.0.lock().unwrap().push(target.to_path_buf());
    }
}

struct TestDaemon {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    client: Client,
    kills: Arc<RecordedKills>,
    unmounts: Arc<RecordedUnmounts>,
    handle: JoinHandle<Result<()>>,
}

impl TestDaemon {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nestbox.sock");
        let client = Client::new(&socket);
        let kills = Arc::new(RecordedKills::default());
        let unmounts = Arc::new(RecordedUnmounts::default());

        let listener = daemon::bind(&socket).unwrap();
        let mut orchestrator = Orchestrator::new(
            Box::new(LoopbackLauncher {
                client: client.clone(),
                next_pid: Arc::new(AtomicI32::new(4242)),
            }),
            Arc::clone(&kills) as Arc<dyn ProcessControl>,
            Arc::clone(&unmounts) as Arc<dyn MountOps>,
            2,
        );
        let serve_path = socket.clone();
        let handle = thread::spawn(move || daemon::serve(&listener, &serve_path, &mut orchestrator));

        Self {
            _dir: dir,
            socket,
            client,
            kills,
            unmounts,
            handle,
        }
    }

    fn stop(self) -> (Vec<Pid>, Vec<PathBuf>) {
        self.client.kill_daemon().unwrap();
        self.handle.join().unwrap().unwrap();
        assert!(!self.socket.exists(), "socket must be removed at shutdown");
        let kills = self.kills.0.lock().unwrap().clone();
        let unmounts = self.unmounts.0.lock().unwrap().clone();
        (kills, unmounts)
    }
}

fn id(path: &str) -> ContainerId {
    ContainerId::parse(path).unwrap()
}

fn creation(path: &str, argv: &[&str], container: ContainerSpec) -> CreationSpec {
    CreationSpec::new(id(path), argv.iter().map(ToString::to_string).collect(), container)
}

#[test]
fn daemon_answers_probe() {
    let d = TestDaemon::start();
    d.client.probe().unwrap();
    assert!(d.client.is_daemon_running());
    let _ = d.stop();
}

#[test]
fn create_register_kill_scenario() {
    let d = TestDaemon::start();
    let c1 = id("/c1");

    let outcome = d
        .client
        .create(&creation("/c1", &["/bin/true"], ContainerSpec::default()))
        .unwrap();
    assert_eq!(outcome, CreateOutcome::Submitted);

    let pid = d.client.wait_until_running(&c1, WAIT).unwrap();
    assert_eq!(pid, Pid::from_raw(4242));
    assert!(d.client.is_active(&c1).unwrap());

    match d.client.create(&creation("/c1", &[], ContainerSpec::default())).unwrap() {
        CreateOutcome::Running(running) => {
            assert_eq!(running.pid, pid);
            assert!(running.spec.no_new_privs);
            assert!(running.spec.seccomp_enabled);
        }
        other => panic!("expected running container, got {other:?}"),
    }

    assert_eq!(d.client.kill(&c1).unwrap(), KillOutcome::Killed(Vec::new()));
    assert!(!d.client.is_active(&c1).unwrap());
    assert!(d.client.ps().unwrap().is_empty());
    assert_eq!(d.client.kill(&c1).unwrap(), KillOutcome::NotRunning);

    let (kills, _) = d.stop();
    assert_eq!(kills, vec![Pid::from_raw(4242)]);
}

#[test]
fn distinct_creates_register_with_their_own_pids() {
    let d = TestDaemon::start();
    d.client.create(&creation("/a", &[], ContainerSpec::default())).unwrap();
    d.client.create(&creation("/b", &[], ContainerSpec::default())).unwrap();

    let pa = d.client.wait_until_running(&id("/a"), WAIT).unwrap();
    let pb = d.client.wait_until_running(&id("/b"), WAIT).unwrap();
    assert_ne!(pa, pb);

    let listed = d.client.ps().unwrap();
    assert_eq!(listed.len(), 2);
    let _ = d.stop();
}

#[test]
fn worker_death_report_removes_container() {
    let d = TestDaemon::start();
    d.client.create(&creation("/c1", &[], ContainerSpec::default())).unwrap();
    let pid = d.client.wait_until_running(&id("/c1"), WAIT).unwrap();

    d.client.report_died(&id("/c1"), pid).unwrap();
    assert!(!d.client.is_active(&id("/c1")).unwrap());

    let (kills, _) = d.stop();
    assert!(kills.is_empty());
}

#[test]
fn malformed_sessions_do_not_stop_the_daemon() {
    let d = TestDaemon::start();

    let mut raw = UnixStream::connect(&d.socket).unwrap();
    raw.write_all(&5u32.to_le_bytes()).unwrap();
    raw.write_all(b"hello").unwrap();
    drop(raw);

    let mut truncated = UnixStream::connect(&d.socket).unwrap();
    truncated.write_all(&100u32.to_le_bytes()).unwrap();
    truncated.write_all(b"\0cre").unwrap();
    drop(truncated);

    d.client.probe().unwrap();
    assert!(d.client.ps().unwrap().is_empty());
    let _ = d.stop();
}

#[test]
fn shutdown_kills_and_unmounts_everything() {
    let d = TestDaemon::start();
    let with_mount = ContainerSpec {
        extra_mounts: vec![MountRequest::new("tmpfs", "/scratch")],
        ..ContainerSpec::default()
    };
    d.client.create(&creation("/c1", &[], with_mount)).unwrap();
    let pid = d.client.wait_until_running(&id("/c1"), WAIT).unwrap();

    let (kills, unmounts) = d.stop();
    assert_eq!(kills, vec![pid]);
    // Two retries for each of: extra mount, sys, dev, proc, root.
    assert_eq!(unmounts.len(), 10);
    assert_eq!(unmounts[0], PathBuf::from("/c1/scratch"));
    assert_eq!(unmounts[9], PathBuf::from("/c1"));
}
