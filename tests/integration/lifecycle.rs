use crate::common::*;
use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use std::time::Duration;
use tokio::process::{Child, Command};

fn fake_project() -> (TestProject, u16) {
    let port = free_port();
    let project = TestProject::new("");
    let runtime = fake_proxy_runtime(project.dir.path());
    project.write_home_config(port, &format!("{runtime}\n{MODEL_TOML}"));
    (project, port)
}

fn spawn_start(project: &TestProject) -> Child {
    Command::new(env!("CARGO_BIN_EXE_proxyme"))
        .args(["start", "-f", project.config_arg()])
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start proxyme")
}

async fn wait_active(project: &TestProject, port: u16) -> serde_json::Value {
    assert!(
        wait_for_port(port, Duration::from_secs(15)).await,
        "proxy did not become reachable on port {port}"
    );
    wait_for_state(&project.state_file(), Duration::from_secs(15), |v| {
        v["status"] == "Active"
    })
    .await
    .expect("state.json never reported Active")
}

fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal).ok();
}

#[tokio::test]
async fn start_status_stop_lifecycle() {
    let (project, port) = fake_project();
    let mut child = spawn_start(&project);
    let state = wait_active(&project, port).await;
    assert_eq!(state["port"], port);
    assert!(state["child_pid"].is_u64());

    AssertCommand::cargo_bin("proxyme")
        .unwrap()
        .args(["status", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Active"));

    AssertCommand::cargo_bin("proxyme")
        .unwrap()
        .args(["stop", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Proxy stopped"));

    let status = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("proxyme did not exit in time")
        .expect("failed to wait on proxyme");
    assert!(status.success(), "start exited with {status}");

    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "Port {port} was not released after stop"
    );
    assert!(!project.state_file().exists());

    let log = std::fs::read_to_string(project.log_file()).unwrap();
    assert!(log.contains("=== Proxy Started ==="), "{log}");
    assert!(log.contains("listening on"), "{log}");
    assert!(log.contains("=== Stopping Proxy ==="), "{log}");
    assert!(log.contains("Proxy stopped"), "{log}");
    assert!(project.proxy_dir().join(".env").exists());
}

#[tokio::test]
async fn ctrl_c_stops_the_proxy() {
    let (project, port) = fake_project();
    let mut child = spawn_start(&project);
    wait_active(&project, port).await;

    send_signal(child.id().unwrap(), nix::sys::signal::Signal::SIGINT);

    let status = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("proxyme did not exit in time")
        .expect("failed to wait on proxyme");
    assert!(status.success(), "start exited with {status}");
    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "Port {port} was not released after Ctrl-C"
    );
}

#[tokio::test]
async fn unexpected_proxy_exit_fails_start() {
    let (project, port) = fake_project();
    let mut child = spawn_start(&project);
    let state = wait_active(&project, port).await;

    let proxy_pid = state["child_pid"].as_u64().unwrap() as u32;
    send_signal(proxy_pid, nix::sys::signal::Signal::SIGKILL);

    let status = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("proxyme did not exit in time")
        .expect("failed to wait on proxyme");
    assert!(!status.success(), "start should fail when the proxy dies");
    assert!(!project.state_file().exists());
}

#[tokio::test]
async fn restart_signal_runs_the_pipeline() {
    let (project, port) = fake_project();
    let mut child = spawn_start(&project);
    let before = wait_active(&project, port).await;
    let old_pid = before["child_pid"].as_u64().unwrap();

    AssertCommand::cargo_bin("proxyme")
        .unwrap()
        .args(["restart", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restart requested"));

    let after = wait_for_state(&project.state_file(), Duration::from_secs(20), |v| {
        v["status"] == "Active" && v["child_pid"].as_u64().is_some_and(|p| p != old_pid)
    })
    .await
    .expect("proxy never came back with a new PID");
    assert_eq!(after["port"], port);

    let log = std::fs::read_to_string(project.log_file()).unwrap();
    for phase in [
        "=== Restarting Proxy ===",
        "PHASE 1: Stopping proxy...",
        "PHASE 2: Cleanup...",
        "PHASE 3: Regenerating configuration...",
        "PHASE 4: Starting proxy...",
    ] {
        assert!(log.contains(phase), "missing {phase:?} in {log}");
    }
    assert!(project.proxy_dir().join("models.json").exists());

    send_signal(child.id().unwrap(), nix::sys::signal::Signal::SIGTERM);
    let status = tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("proxyme did not exit in time")
        .expect("failed to wait on proxyme");
    assert!(status.success(), "start exited with {status}");
}

#[tokio::test]
async fn stop_during_restart_waits_for_the_pipeline() {
    let (project, port) = fake_project();
    let child = Command::new(env!("CARGO_BIN_EXE_proxyme"))
        .args(["start", "-f", project.config_arg()])
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start proxyme");
    wait_active(&project, port).await;

    let pid = child.id().unwrap();
    send_signal(pid, nix::sys::signal::Signal::SIGHUP);
    tokio::time::sleep(Duration::from_millis(200)).await;
    send_signal(pid, nix::sys::signal::Signal::SIGTERM);

    let output = tokio::time::timeout(Duration::from_secs(20), child.wait_with_output())
        .await
        .expect("proxyme did not exit in time")
        .expect("failed to wait on proxyme");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "start exited with {}: {stderr}", output.status);
    assert!(
        stderr.contains("Shutting down after the restart in progress"),
        "{stderr}"
    );

    let log = std::fs::read_to_string(project.log_file()).unwrap();
    assert!(log.contains("PHASE 4: Starting proxy..."), "{log}");
    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "Port {port} was not released after stop"
    );
    assert!(!project.state_file().exists());
}
