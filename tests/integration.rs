use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn trail_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_trail"))
}

const SLACK_LINE: &str = r##"{"url":"https://app.slack.com/client/T01/C02","title":"#ops | Acme","timestamp":"2024-03-01T10:00:00Z","text":"deploy notes: password: hunter2 please rotate","images":[],"html":"","received_at":1709287205}"##;
const INVOICE_LINE: &str = r#"{"url":"https://billing.example.com/invoices/42","title":"Invoice 42","timestamp":"2024-03-02T09:00:00Z","text":"Invoice 42 for March hosting, total due 120 EUR","images":[],"html":""}"#;
const INVOICE_COPY_LINE: &str = r#"{"url":"https://mirror.example.org/invoices/42","title":"Invoice 42 copy","timestamp":"2024-03-02T09:05:00Z","text":"Invoice 42 for March hosting, total due 120 EUR","images":[],"html":""}"#;
const TRACKER_LINE: &str = r#"{"url":"https://ads.tracker.net/pixel","title":"ad","timestamp":1709370000,"text":"tracking pixel page"}"#;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/trail.sqlite"

[queue]
path = "{root}/data/queue.jsonl"
archive_dir = "{root}/data/archive"
commit_batch_size = 2

[retrieval]
final_limit = 5

[server]
bind = "127.0.0.1:7379"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("trail.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn write_queue(root: &Path, lines: &[&str]) {
    let mut body = lines.join("\n");
    body.push('\n');
    fs::write(root.join("data/queue.jsonl"), body).unwrap();
}

fn run_trail(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = trail_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run trail binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn first_id(search_stdout: &str) -> String {
    search_stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("id: "))
        .map(str::to_string)
        .expect("no id line in search output")
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trail(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_trail(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_trail(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_ingest_reports_and_drains_queue() {
    let (tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);
    write_queue(
        tmp.path(),
        &[SLACK_LINE, INVOICE_LINE, INVOICE_COPY_LINE, "{not json", ""],
    );

    let (stdout, stderr, success) = run_trail(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested: 2"), "{}", stdout);
    assert!(stdout.contains("duplicates: 1"), "{}", stdout);
    assert!(stdout.contains("parse failures: 1"), "{}", stdout);
    assert!(stdout.contains("redacted: 1"), "{}", stdout);
    assert!(stdout.contains("ok"));

    let queue = fs::read_to_string(tmp.path().join("data/queue.jsonl")).unwrap();
    assert!(queue.is_empty());

    let archives: Vec<_> = fs::read_dir(tmp.path().join("data/archive"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(archives.len(), 1);
    let archived = fs::read_to_string(&archives[0]).unwrap();
    assert_eq!(archived.lines().count(), 3);
    assert!(!archived.contains("{not json"));

    // Re-ingesting the same snapshots adds nothing.
    write_queue(tmp.path(), &[SLACK_LINE, INVOICE_LINE]);
    let (stdout, _, _) = run_trail(&config_path, &["ingest"]);
    assert!(stdout.contains("ingested: 0"), "{}", stdout);
    assert!(stdout.contains("duplicates: 2"), "{}", stdout);
}

#[test]
fn test_ingest_dry_run_keeps_queue() {
    let (tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);
    write_queue(tmp.path(), &[INVOICE_LINE]);

    let (stdout, _, success) = run_trail(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("ingested: 1"));

    let queue = fs::read_to_string(tmp.path().join("data/queue.jsonl")).unwrap();
    assert!(queue.contains("Invoice 42"));

    let (stdout, _, _) = run_trail(&config_path, &["stats"]);
    assert!(stdout.contains("Records:     0"), "{}", stdout);
}

#[test]
fn test_search_get_and_forget() {
    let (tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);
    write_queue(tmp.path(), &[SLACK_LINE, INVOICE_LINE]);
    run_trail(&config_path, &["ingest"]);

    let (stdout, stderr, success) =
        run_trail(&config_path, &["search", "invoice", "--mode", "lexical"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("billing.example.com"));
    assert!(!stdout.contains("2. ["));

    // Hybrid without embeddings falls back to the lexical list.
    let (stdout, _, success) = run_trail(&config_path, &["search", "invoice", "--limit", "5"]);
    assert!(success);
    assert!(stdout.contains("billing.example.com"));

    let id = first_id(&stdout);
    let (stdout, _, success) = run_trail(&config_path, &["get", &id]);
    assert!(success);
    assert!(stdout.contains("category:     general"));
    assert!(stdout.contains("Invoice 42 for March hosting"));

    let (stdout, _, success) = run_trail(&config_path, &["forget", &id]);
    assert!(success);
    assert!(stdout.contains("forgot"));

    let (stdout, _, _) = run_trail(&config_path, &["search", "invoice", "--mode", "lexical"]);
    assert!(stdout.contains("No results."));

    let (_, stderr, success) = run_trail(&config_path, &["get", &id]);
    assert!(!success);
    assert!(stderr.contains("Record not found"));
}

#[test]
fn test_slack_record_is_redacted_chat() {
    let (tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);
    write_queue(tmp.path(), &[SLACK_LINE]);
    run_trail(&config_path, &["ingest"]);

    let (stdout, _, _) = run_trail(
        &config_path,
        &["search", "deploy", "--mode", "lexical", "--category", "chat"],
    );
    let id = first_id(&stdout);
    let (stdout, _, _) = run_trail(&config_path, &["get", &id]);
    assert!(stdout.contains("category:     chat"));
    assert!(stdout.contains("redacted:     true"));
    assert!(stdout.contains("sensitive:    true"));
    assert!(stdout.contains("[REDACTED]"));
    assert!(!stdout.contains("hunter2"));
}

#[test]
fn test_search_filters() {
    let (tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);
    write_queue(tmp.path(), &[SLACK_LINE, INVOICE_LINE]);
    run_trail(&config_path, &["ingest"]);

    let (stdout, _, _) = run_trail(
        &config_path,
        &["search", "invoice", "--mode", "lexical", "--domain", "example.com"],
    );
    assert!(stdout.contains("billing.example.com"));

    let (stdout, _, _) = run_trail(
        &config_path,
        &["search", "invoice", "--mode", "lexical", "--until", "2024-03-02"],
    );
    assert!(stdout.contains("No results."));

    let (_, stderr, success) = run_trail(
        &config_path,
        &["search", "invoice", "--category", "recipes"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown category"));
}

#[test]
fn test_semantic_search_requires_embeddings() {
    let (_tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);

    let (_, stderr, success) = run_trail(&config_path, &["search", "anything", "--mode", "semantic"]);
    assert!(!success);
    assert!(stderr.contains("requires embeddings"));
}

#[test]
fn test_block_add_purge_and_skip() {
    let (tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);
    write_queue(tmp.path(), &[INVOICE_LINE, TRACKER_LINE]);
    run_trail(&config_path, &["ingest"]);

    let (stdout, _, success) =
        run_trail(&config_path, &["block", "add", "https://www.Example.com/", "--purge"]);
    assert!(success);
    assert!(stdout.contains("blocked example.com"));
    assert!(stdout.contains("purged records: 1"));

    let (stdout, _, _) = run_trail(&config_path, &["block", "add", "tracker.net"]);
    assert!(stdout.contains("blocked tracker.net"));

    let (stdout, _, _) = run_trail(&config_path, &["block", "list"]);
    assert!(stdout.contains("example.com"));
    assert!(stdout.contains("tracker.net"));

    // New snapshots from blocked subdomains are dropped.
    write_queue(tmp.path(), &[INVOICE_LINE, TRACKER_LINE]);
    let (stdout, _, _) = run_trail(&config_path, &["ingest"]);
    assert!(stdout.contains("blocked: 2"), "{}", stdout);
    assert!(stdout.contains("ingested: 0"), "{}", stdout);

    let (stdout, _, success) = run_trail(&config_path, &["block", "remove", "tracker.net"]);
    assert!(success);
    assert!(stdout.contains("unblocked tracker.net"));

    let (_, stderr, success) = run_trail(&config_path, &["block", "remove", "tracker.net"]);
    assert!(!success);
    assert!(stderr.contains("not blocked"));
}

#[test]
fn test_embed_and_ask_need_providers() {
    let (_tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);

    let (_, stderr, success) = run_trail(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));

    let (_, stderr, success) = run_trail(&config_path, &["ask", "when did I pay invoice 42?"]);
    assert!(!success);
    assert!(stderr.contains("completion provider"));
}

#[test]
fn test_stats_counts_categories() {
    let (tmp, config_path) = setup_test_env();
    run_trail(&config_path, &["init"]);
    write_queue(tmp.path(), &[SLACK_LINE, INVOICE_LINE]);
    run_trail(&config_path, &["ingest"]);

    let (stdout, _, success) = run_trail(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Records:     2"), "{}", stdout);
    assert!(stdout.contains("Sensitive:   1"), "{}", stdout);
    assert!(stdout.contains("chat"));
    assert!(stdout.contains("general"));
}
