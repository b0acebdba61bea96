//! `dirsync daemon start` as a child process, driven through the CLI.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use tempfile::TempDir;

fn dirsync(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dirsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("IDP_TYPE", "ldap")
        .env("IDP_HOST", "127.0.0.1")
        .env("IDP_PORT", "1")
        .env("STORAGE_IN_MEMORY", "true")
        .env("SYNC_INTERVAL_SECS", "3600")
        .env_remove("QUERY_MODE");
    cmd
}

struct DaemonProcess {
    child: Child,
    home: PathBuf,
}

impl DaemonProcess {
    fn start(home: &Path) -> Self {
        let child = dirsync(home)
            .args(["daemon", "start"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon");
        Self {
            child,
            home: home.to_path_buf(),
        }
    }

    fn wait_for_exit(&mut self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return true;
            }
            sleep(Duration::from_millis(50));
        }
        false
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        let _ = dirsync(&self.home).args(["daemon", "stop"]).status();
        if !self.wait_for_exit(Duration::from_secs(2)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn run(home: &Path, args: &[&str]) -> Output {
    dirsync(home).args(args).output().expect("run dirsync")
}

fn status(home: &Path) -> Option<serde_json::Value> {
    let output = run(home, &["daemon", "status"]);
    if !output.status.success() {
        return None;
    }
    serde_json::from_slice(&output.stdout).ok()
}

/// Wait until the daemon answers and its first cycle has completed.
fn wait_for_first_cycle(home: &Path) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Some(status) = status(home) {
            if status["running"] == serde_json::Value::Bool(true)
                && status["engine"]["cycles"].as_u64().unwrap_or(0) >= 1
                && status["engine"]["state"] == "idle"
            {
                return status;
            }
        }
        sleep(Duration::from_millis(100));
    }
    panic!("daemon did not finish its first cycle in time");
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn daemon_serves_queries_and_stops_on_request() {
    let home = TempDir::new().expect("home");
    let mut daemon = DaemonProcess::start(home.path());

    // The directory is unreachable: the cycle fails, the daemon keeps running.
    let status = wait_for_first_cycle(home.path());
    assert!(status["engine"]["last_error"].is_string());
    assert_eq!(status["engine"]["last_success_at"], serde_json::Value::Null);
    assert_eq!(status["stored_records"], 0);
    assert_eq!(status["source_kind"], "ldap");
    assert_eq!(status["query_mode"], "cache");

    let get = run(home.path(), &["get", "no-such-key"]);
    assert!(!get.status.success());
    assert!(stderr(&get).contains("no record for key"));

    let empty_key = run(home.path(), &["get", ""]);
    assert!(!empty_key.status.success());
    assert!(stderr(&empty_key).contains("invalid_argument"));

    let list = run(home.path(), &["list", "--json"]);
    assert!(list.status.success(), "{}", stderr(&list));
    assert!(list.stdout.is_empty());

    let table = run(home.path(), &["list"]);
    assert!(table.status.success());
    assert!(String::from_utf8_lossy(&table.stdout).contains("No records."));

    let sync = run(home.path(), &["sync"]);
    assert!(!sync.status.success());
    assert!(stderr(&sync).contains("sync via daemon failed"));

    let stop = run(home.path(), &["daemon", "stop"]);
    assert!(stop.status.success());
    assert!(daemon.wait_for_exit(Duration::from_secs(5)), "daemon did not exit");
    assert!(!home.path().join(".dirsync").join("dirsync.sock").exists());
}

#[test]
fn second_daemon_refuses_to_start() {
    let home = TempDir::new().expect("home");
    let _daemon = DaemonProcess::start(home.path());
    wait_for_first_cycle(home.path());

    let second = run(home.path(), &["daemon", "start"]);
    assert!(!second.status.success());
    assert!(stderr(&second).contains("already in use"));
}
