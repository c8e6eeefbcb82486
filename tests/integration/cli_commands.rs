use crate::common::*;
use assert_cmd::Command;
use predicates::prelude::*;

fn proxyme() -> Command {
    Command::cargo_bin("proxyme").unwrap()
}

#[test]
fn validate_accepts_valid_config() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), MODEL_TOML);

    proxyme()
        .args(["validate", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("proxyme.toml is valid (1 models, 1 enabled)"));
}

#[test]
fn validate_reports_every_problem() {
    let project = TestProject::new(
        r#"
[proxy]
port = 0
host = ""

[[models]]
name = "a"
provider = "x"
endpoint = "https://x.invalid"
temperature = 9.0

[[models]]
name = "a"
provider = "x"
"#,
    );

    proxyme()
        .args(["validate", "-f", project.config_arg()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("proxy port must be a positive integer"))
        .stderr(predicate::str::contains("proxy host is empty"))
        .stderr(predicate::str::contains("defined more than once"))
        .stderr(predicate::str::contains("outside 0.0..=2.0"));
}

#[test]
fn missing_config_file_flag_errors() {
    proxyme()
        .args(["status", "-f", "/definitely/not/here/proxyme.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn init_writes_starter_config_once() {
    let project = TestProject::new("");
    std::fs::remove_file(&project.config_path).unwrap();

    proxyme()
        .arg("init")
        .current_dir(project.dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Created proxyme.toml"));
    assert!(project.config_path.exists());

    proxyme()
        .args(["validate", "-f", project.config_arg()])
        .assert()
        .success();

    proxyme()
        .arg("init")
        .current_dir(project.dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn generate_writes_handoff_files() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), MODEL_TOML);

    proxyme()
        .args(["generate", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 enabled model)"))
        .stdout(predicate::str::contains("Created"))
        .stdout(predicate::str::contains("sk-i••••0000"));

    let models = std::fs::read_to_string(project.proxy_dir().join("models.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&models).unwrap();
    assert_eq!(doc["version"], "2.1.0");
    assert_eq!(doc["models"][0]["id"], "deepseek-chat");
    assert!(!models.contains("sk-integration-0000"));

    let env = std::fs::read_to_string(project.proxy_dir().join(".env")).unwrap();
    assert!(env.contains("DEEPSEEK_API_KEY=sk-integration-0000"), "{env}");

    // A second run leaves the edited secrets file alone.
    std::fs::write(project.proxy_dir().join(".env"), "DEEPSEEK_API_KEY=edited\n").unwrap();
    proxyme()
        .args(["generate", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Kept existing"));
    let env = std::fs::read_to_string(project.proxy_dir().join(".env")).unwrap();
    assert_eq!(env, "DEEPSEEK_API_KEY=edited\n");
}

#[test]
fn generate_without_enabled_models_fails() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), "");

    proxyme()
        .args(["generate", "-f", project.config_arg()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn status_when_nothing_runs_is_inactive() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), "");

    proxyme()
        .args(["status", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Inactive"))
        .stdout(predicate::str::contains("missing"));
}

#[test]
fn stop_when_nothing_runs_is_a_no_op() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), "");

    proxyme()
        .args(["stop", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Proxy is not running"));
}

#[test]
fn restart_without_supervisor_fails() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), "");

    proxyme()
        .args(["restart", "-f", project.config_arg()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no running proxyme supervisor"));
}

#[test]
fn logs_before_first_start() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), "");

    proxyme()
        .args(["logs", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No log file yet"));
}

#[test]
fn logs_prints_the_tail() {
    let project = TestProject::new("");
    project.write_home_config(free_port(), "");
    std::fs::create_dir_all(project.log_file().parent().unwrap()).unwrap();
    let content: String = (1..=10).map(|i| format!("[t] line {i}\n")).collect();
    std::fs::write(project.log_file(), content).unwrap();

    proxyme()
        .args(["logs", "-n", "2", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("line 9"))
        .stdout(predicate::str::contains("line 10"))
        .stdout(predicate::str::contains("line 8").not());
}

#[cfg(unix)]
#[test]
fn install_runs_package_manager_once() {
    let project = TestProject::new("");
    let runtime = fake_proxy_runtime(project.dir.path());
    project.write_home_config(free_port(), &runtime);

    proxyme()
        .args(["install", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("added 1 package"));
    assert!(project.proxy_dir().join("node_modules").is_dir());
    assert!(project.proxy_dir().join("proxy.js").is_file());

    proxyme()
        .args(["install", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("already installed"));

    proxyme()
        .args(["install", "--force", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("added 1 package"));
}

#[cfg(unix)]
#[test]
fn doctor_lists_candidates() {
    let project = TestProject::new("");
    let runtime = fake_proxy_runtime(project.dir.path());
    project.write_home_config(free_port(), &runtime);

    proxyme()
        .args(["doctor", "-f", project.config_arg()])
        .assert()
        .success()
        .stdout(predicate::str::contains("v20.11.1"))
        .stdout(predicate::str::contains("dependencies"));
}
