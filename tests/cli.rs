use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn parse_jsonl(stdout: &[u8]) -> Vec<Value> {
    let s = String::from_utf8_lossy(stdout);
    s.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str::<Value>(l).expect("valid jsonl line"))
        .collect()
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// A site directory, a store directory and a small manifest
struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempdir().unwrap();
        let site = temp.path().join("site");
        write_file(&site.join("index.html"), "<h1>cosmos</h1>");
        write_file(&site.join("style.css"), "body { color: pink; }");
        write_file(&site.join("images/pupu.png"), "png-v1");
        write_file(&site.join("audio/bgm.mp3"), "mp3-v1");
        write_file(
            &temp.path().join("manifest.json"),
            r#"["/", "/style.css", "/images/missing.webp", "/audio/bgm.mp3"]"#,
        );
        Self { temp }
    }

    fn site(&self) -> std::path::PathBuf {
        self.temp.path().join("site")
    }

    fn store(&self) -> std::path::PathBuf {
        self.temp.path().join("store")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("swcache"));
        cmd.arg("--site")
            .arg(self.site())
            .arg("--store")
            .arg(self.store())
            .arg("--manifest")
            .arg(self.temp.path().join("manifest.json"));
        cmd
    }

    fn run(&self, args: &[&str]) -> Vec<Value> {
        let assert = self.cmd().args(args).assert().success();
        parse_jsonl(&assert.get_output().stdout)
    }
}

fn find<'a>(items: &'a [Value], kind: &str, url: &str) -> &'a Value {
    items
        .iter()
        .find(|v| v["kind"] == kind && v["url"] == url)
        .unwrap_or_else(|| panic!("no {} item for {}", kind, url))
}

#[test]
fn install_precaches_manifest_and_skips_audio() {
    let fx = Fixture::new();
    let items = fx.run(&["install"]);

    assert_eq!(find(&items, "precache", "/")["outcome"], "cached");
    assert_eq!(find(&items, "precache", "/style.css")["outcome"], "cached");
    assert_eq!(
        find(&items, "precache", "/audio/bgm.mp3")["outcome"],
        "skipped-audio"
    );

    let missing = find(&items, "precache", "/images/missing.webp");
    assert_eq!(missing["outcome"], "failed");
    assert_eq!(missing["errors"][0]["code"], "PRECACHE_FAILED");

    let current = items
        .iter()
        .find(|v| v["kind"] == "generation")
        .expect("generation item");
    assert_eq!(current["generation"], "pupu-cosmos-v1");
    assert_eq!(current["outcome"], "current");

    assert!(fx.store().join("pupu-cosmos-v1/meta.json").is_file());
}

#[test]
fn fetch_goes_to_network_then_cache() {
    let fx = Fixture::new();

    let first = fx.run(&["fetch", "/images/pupu.png", "--show-body"]);
    let fetched = find(&first, "fetch", "http://localhost:8080/images/pupu.png");
    assert_eq!(fetched["outcome"], "network");
    assert_eq!(fetched["status"], 200);
    assert_eq!(fetched["excerpt"], "png-v1");

    // The stored copy wins over the changed file
    write_file(&fx.site().join("images/pupu.png"), "png-v2");
    let second = fx.run(&["fetch", "/images/pupu.png", "--show-body"]);
    let cached = find(&second, "fetch", "http://localhost:8080/images/pupu.png");
    assert_eq!(cached["outcome"], "cache");
    assert_eq!(cached["excerpt"], "png-v1");
}

#[test]
fn fetch_installs_when_generation_is_missing() {
    let fx = Fixture::new();
    let items = fx.run(&["fetch", "/style.css"]);

    assert!(items.iter().any(|v| v["kind"] == "precache"));
    let fetched = find(&items, "fetch", "http://localhost:8080/style.css");
    assert_eq!(fetched["outcome"], "cache");
}

#[test]
fn not_found_responses_are_not_stored() {
    let fx = Fixture::new();
    for _ in 0..2 {
        let items = fx.run(&["fetch", "/missing.css"]);
        let fetched = find(&items, "fetch", "http://localhost:8080/missing.css");
        assert_eq!(fetched["outcome"], "network");
        assert_eq!(fetched["status"], 404);
    }
}

#[test]
fn unmatched_paths_are_not_stored() {
    let fx = Fixture::new();
    write_file(&fx.site().join("data.json"), "{}");
    for _ in 0..2 {
        let items = fx.run(&["fetch", "/data.json"]);
        assert_eq!(
            find(&items, "fetch", "http://localhost:8080/data.json")["outcome"],
            "network"
        );
    }
}

#[test]
fn audio_is_network_first() {
    let fx = Fixture::new();
    let first = fx.run(&["fetch", "/audio/bgm.mp3", "--show-body"]);
    assert_eq!(
        find(&first, "fetch", "http://localhost:8080/audio/bgm.mp3")["excerpt"],
        "mp3-v1"
    );

    write_file(&fx.site().join("audio/bgm.mp3"), "mp3-v2");
    let second = fx.run(&["fetch", "/audio/bgm.mp3", "--show-body"]);
    let fetched = find(&second, "fetch", "http://localhost:8080/audio/bgm.mp3");
    assert_eq!(fetched["outcome"], "network");
    assert_eq!(fetched["excerpt"], "mp3-v2");
}

#[test]
fn cross_origin_requests_pass_through() {
    let fx = Fixture::new();
    let items = fx.run(&["fetch", "https://cdn.example.com/lib.js"]);
    let fetched = find(&items, "fetch", "https://cdn.example.com/lib.js");
    assert_eq!(fetched["outcome"], "passthrough");
    assert!(fetched.get("status").is_none());
}

#[test]
fn status_lists_current_entries() {
    let fx = Fixture::new();
    fx.run(&["install"]);

    let items = fx.run(&["status"]);
    let generation = items
        .iter()
        .find(|v| v["kind"] == "generation")
        .expect("generation item");
    assert_eq!(generation["outcome"], "current");

    let css = find(&items, "entry", "http://localhost:8080/style.css");
    assert_eq!(css["status"], 200);
    assert_eq!(css["meta"]["content_type"], "text/css; charset=utf-8");
    assert_eq!(css["meta"]["digest"].as_str().unwrap().len(), 40);
    assert!(css["meta"]["cached_at"].is_string());
}

#[test]
fn activate_deletes_other_generations() {
    let fx = Fixture::new();
    fx.run(&["--generation", "pupu-cosmos-v0", "install"]);

    let items = fx.run(&["activate"]);
    let deleted: Vec<_> = items
        .iter()
        .filter(|v| v["outcome"] == "deleted")
        .map(|v| v["generation"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(deleted, vec!["pupu-cosmos-v0"]);
    assert!(!fx.store().join("pupu-cosmos-v0").exists());
}

#[test]
fn clear_replies_success_and_empties_cache() {
    let fx = Fixture::new();
    fx.run(&["install"]);

    let items = fx.run(&["clear"]);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["kind"], "reply");
    assert_eq!(items[0]["data"], serde_json::json!({"success": true}));

    let status = fx.run(&["status"]);
    assert!(status.is_empty());
}

#[test]
fn unknown_message_gets_no_reply() {
    let fx = Fixture::new();
    let items = fx.run(&["message", r#"{"type":"PING"}"#]);
    assert_eq!(items[0]["kind"], "error");
    assert_eq!(items[0]["errors"][0]["code"], "NO_REPLY");
}

#[test]
fn message_rejects_invalid_json() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["message", "{not json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not valid JSON"));
}

#[test]
fn classify_reports_policy() {
    let fx = Fixture::new();
    let items = fx.run(&["classify", "/audio/bgm.mp3", "/images/a.JPG", "/api/data"]);

    assert_eq!(items[0]["outcome"], "audio");
    assert_eq!(items[0]["data"]["cache_first"], false);
    assert_eq!(items[1]["outcome"], "image");
    assert_eq!(items[1]["data"]["persist_on_fetch"], true);
    assert_eq!(items[2]["outcome"], "other");
    assert_eq!(items[2]["data"]["persist_on_fetch"], false);
}

#[test]
fn ephemeral_store_leaves_no_files() {
    let fx = Fixture::new();
    let items = fx.run(&["--ephemeral", "fetch", "/style.css"]);
    assert_eq!(
        find(&items, "fetch", "http://localhost:8080/style.css")["outcome"],
        "cache"
    );
    assert!(!fx.store().exists());
}

#[test]
fn markdown_output() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["--format", "md", "classify", "/style.css"])
        .assert()
        .success()
        .stdout(predicate::str::contains("## Classification"))
        .stdout(predicate::str::contains("`/style.css` static"));
}

#[test]
fn activate_without_install_reports_missing_generation() {
    let fx = Fixture::new();
    let items = fx.run(&["activate"]);
    let current = items
        .iter()
        .find(|v| v["generation"] == "pupu-cosmos-v1")
        .expect("generation item");
    assert_eq!(current["outcome"], "missing");

    fx.run(&["install"]);
    let items = fx.run(&["activate"]);
    assert_eq!(items[0]["outcome"], "current");
}

#[test]
fn install_claims_registered_pages() {
    let fx = Fixture::new();
    let items = fx.run(&[
        "--page",
        "http://localhost:8080/",
        "--page",
        "http://localhost:8080/about",
        "install",
    ]);
    let current = items
        .iter()
        .find(|v| v["kind"] == "generation")
        .expect("generation item");
    assert_eq!(current["data"]["claimed"], 2);
    assert_eq!(current["data"]["controlled"], 2);
}

#[test]
fn fetch_accepts_client_id() {
    let fx = Fixture::new();
    let items = fx.run(&["--page", "http://localhost:8080/", "fetch", "--client", "page-1", "/style.css"]);
    assert_eq!(
        find(&items, "fetch", "http://localhost:8080/style.css")["outcome"],
        "cache"
    );
}
