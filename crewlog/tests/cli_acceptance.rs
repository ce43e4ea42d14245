use crewlog_core::{Database, MessageRole};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    root: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    xdg_runtime: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let root = base.join("sessions");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let xdg_runtime = base.join("xdg-runtime");

        for dir in [&home, &root, &xdg_data, &xdg_config, &xdg_state, &xdg_runtime] {
            fs::create_dir_all(dir).expect("failed to create test directory");
        }

        seed_session_fixture(&root);

        Self {
            _temp_dir: temp_dir,
            home,
            root,
            xdg_data,
            xdg_config,
            xdg_state,
            xdg_runtime,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("crewlog/crewlog.db")
    }
}

fn seed_session_fixture(root: &Path) {
    let fixtures = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../crewlog-core/tests/fixtures");
    fs::copy(fixtures.join("basic-session.jsonl"), root.join("basic.jsonl"))
        .expect("failed to copy session fixture");

    let subagents = root.join("team-1/subagents");
    fs::create_dir_all(&subagents).expect("failed to create subagents directory");
    fs::copy(fixtures.join("team-lead.jsonl"), root.join("team-1.jsonl"))
        .expect("failed to copy lead fixture");
    fs::copy(
        fixtures.join("team-worker.jsonl"),
        subagents.join("agent-a7f3c2d19e88.jsonl"),
    )
    .expect("failed to copy worker fixture");
}

fn run_sync(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("crewlog-sync"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env("XDG_RUNTIME_DIR", &env.xdg_runtime)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute crewlog-sync: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    assert!(
        output.status.success(),
        "crewlog-sync {:?} failed\nstatus: {:?}\nstdout:\n{}\nstderr:\n{}",
        args,
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn sync_once_populates_database() {
    let env = CliTestEnv::new();
    let root = env.root.to_string_lossy().to_string();
    let args = ["--once", "--root", root.as_str()];

    let output = run_sync(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Sync complete:"), "stdout: {stdout}");
    assert!(stdout.contains("Sessions synced:   2"), "stdout: {stdout}");

    let db = Database::open(&env.db_path()).expect("database should exist");
    assert_eq!(db.list_teams().unwrap().len(), 2);
    assert_eq!(db.list_team_agents("team-1").unwrap().len(), 2);

    let messages = db.list_conversation_messages("basic-conv").unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, MessageRole::Agent);
    assert_eq!(db.count_conversation_traces("basic-conv").unwrap(), 1);
}

#[test]
fn repeated_runs_do_not_duplicate_rows() {
    let env = CliTestEnv::new();
    let db_path = env.xdg_data.join("custom/team.db");
    let root = env.root.to_string_lossy().to_string();
    let db_arg = db_path.to_string_lossy().to_string();
    let args = ["--once", "--root", root.as_str(), "--db", db_arg.as_str()];

    for _ in 0..2 {
        let output = run_sync(&env, &args);
        assert_success(&args, &output);
    }

    let db = Database::open(&db_path).expect("custom database should exist");
    assert_eq!(db.count_conversation_messages("team-1-conv").unwrap(), 2);
    assert_eq!(
        db.count_conversation_messages("team-1-conv-a7f3c2d19e88")
            .unwrap(),
        2
    );
    assert!(!env.db_path().exists());
}

#[test]
fn missing_root_fails_with_message() {
    let env = CliTestEnv::new();
    let missing = env.home.join("no-such-root");
    let missing = missing.to_string_lossy().to_string();
    let args = ["--once", "--root", missing.as_str()];

    let output = run_sync(&env, &args);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("session root not found"), "stderr: {stderr}");
}

#[test]
fn root_from_config_file_is_used() {
    let env = CliTestEnv::new();
    let config_dir = env.xdg_config.join("crewlog");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        format!(
            "[source]\nroot = {:?}\n\n[sync]\nbatch_size = 1\n",
            env.root.to_string_lossy()
        ),
    )
    .unwrap();

    let args = ["--once"];
    let output = run_sync(&env, &args);
    assert_success(&args, &output);

    let db = Database::open(&env.db_path()).unwrap();
    assert!(db.get_team("basic").unwrap().is_some());
}

#[test]
fn invalid_config_is_rejected() {
    let env = CliTestEnv::new();
    let config_dir = env.xdg_config.join("crewlog");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("config.toml"), "[sync]\nbatch_size = 0\n").unwrap();

    let root = env.root.to_string_lossy().to_string();
    let output = run_sync(&env, &["--once", "--root", root.as_str()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("batch_size"), "stderr: {stderr}");
}
