use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn wikidex_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_wikidex"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let wiki_dir = root.join("wiki");
    fs::create_dir_all(wiki_dir.join("ops")).unwrap();
    fs::write(
        wiki_dir.join("guide.md"),
        "# Intro\nSee [[Setup]] for details and [[Nowhere|the void]].",
    )
    .unwrap();
    fs::write(
        wiki_dir.join("ops/setup.md"),
        "---\ntitle: Setup\ncategory: ops\n---\nInstall things. Back to [[guide]].",
    )
    .unwrap();
    fs::write(wiki_dir.join("notes.txt"), "Not a wiki page.").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/wikidex.sqlite"

[repo]
root = "{root}/wiki"

[chunking]
max_chunk_size = 500
overlap = 50

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("wikidex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_wikidex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = wikidex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wikidex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_wikidex(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/wikidex.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_wikidex(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_wikidex(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sync_and_status() {
    let (_tmp, config_path) = setup_test_env();

    run_wikidex(&config_path, &["init"]);
    let (stdout, stderr, success) = run_wikidex(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Synced 2 documents (0 failed)"), "{}", stdout);

    let (stdout, _, success) = run_wikidex(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("Documents:        2"), "{}", stdout);
    assert!(stdout.contains("Links:            3 (1 missing)"), "{}", stdout);
    assert!(stdout.contains("Chunks:           0 (0 embedded)"), "{}", stdout);
}

#[test]
fn test_sync_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_wikidex(&config_path, &["sync"]);
    run_wikidex(&config_path, &["sync"]);

    let (stdout, _, _) = run_wikidex(&config_path, &["status"]);
    assert!(stdout.contains("Documents:        2"), "{}", stdout);
    assert!(stdout.contains("Links:            3 (1 missing)"), "{}", stdout);
}

#[test]
fn test_get_and_links() {
    let (_tmp, config_path) = setup_test_env();
    run_wikidex(&config_path, &["sync"]);

    let (stdout, stderr, success) = run_wikidex(&config_path, &["get", "ops/setup.md"]);
    assert!(success, "get failed: {}", stderr);
    assert!(stdout.contains("Title:    Setup"));
    assert!(!stdout.contains("Category:"));
    assert!(stdout.contains("Install things."));

    let (stdout, _, success) = run_wikidex(&config_path, &["links", "guide.md"]);
    assert!(success);
    assert!(stdout.contains("Outgoing (2):"), "{}", stdout);
    assert!(stdout.contains("[[Setup]] \"Setup\" -> ops/setup.md"), "{}", stdout);
    assert!(
        stdout.contains("[[Nowhere]] \"the void\" -> (missing)"),
        "{}",
        stdout
    );
    assert!(stdout.contains("Backlinks (1):"), "{}", stdout);
    assert!(stdout.contains("ops/setup.md \"guide\""), "{}", stdout);
}

#[test]
fn test_get_unknown_path_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_wikidex(&config_path, &["sync"]);

    let (_, stderr, success) = run_wikidex(&config_path, &["get", "absent.md"]);
    assert!(!success);
    assert!(stderr.contains("Document not found"));
}

#[test]
fn test_save_from_file() {
    let (tmp, config_path) = setup_test_env();
    let source = tmp.path().join("draft.md");
    fs::write(&source, "# Draft\nLinks to [[Draft]] itself.").unwrap();

    let (stdout, stderr, success) = run_wikidex(
        &config_path,
        &["save", "drafts/new.md", "--file", source.to_str().unwrap()],
    );
    assert!(success, "save failed: {}", stderr);
    assert!(stdout.contains("Saved drafts/new.md"));
    assert!(tmp.path().join("wiki/drafts/new.md").exists());

    let (stdout, _, _) = run_wikidex(&config_path, &["links", "drafts/new.md"]);
    assert!(stdout.contains("-> drafts/new.md"), "{}", stdout);
}

#[test]
fn test_save_rejects_escaping_path() {
    let (tmp, config_path) = setup_test_env();
    let source = tmp.path().join("draft.md");
    fs::write(&source, "# Evil").unwrap();

    let (_, stderr, success) = run_wikidex(
        &config_path,
        &["save", "../escape.md", "--file", source.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains(".."), "{}", stderr);
    assert!(!tmp.path().join("escape.md").exists());
}

#[test]
fn test_search_without_provider_is_unavailable() {
    let (_tmp, config_path) = setup_test_env();
    run_wikidex(&config_path, &["sync"]);

    let (_, stderr, success) = run_wikidex(&config_path, &["search", "install"]);
    assert!(!success);
    assert!(stderr.contains("unavailable"), "{}", stderr);
}

#[test]
fn test_delete_unknown_id_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_wikidex(&config_path, &["sync"]);

    let (_, stderr, success) = run_wikidex(&config_path, &["delete", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("Document not found"));
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        format!(
            "[db]\npath = \"{0}/x.sqlite\"\n[repo]\nroot = \"{0}\"\n[chunking]\nmax_chunk_size = 10\noverlap = 10\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_wikidex(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "{}", stderr);
}
