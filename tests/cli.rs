//! End-to-end scenarios (spec.md §8, S1-S6) driven through the compiled
//! `todoit` binary, matching the teacher's CLI-integration style
//! (`crates/tak-cli/tests/parity_smoke.rs`): spawn the binary against a
//! throwaway database file per test, assert on exit status and
//! `OUTPUT_FORMAT=json` stdout.

use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tempfile::tempdir;

fn run(db_path: &Path, envs: &[(&str, &str)], args: &[&str]) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_todoit"));
    cmd.env("TODOIT_DB_PATH", db_path)
        .env("OUTPUT_FORMAT", "json")
        .env_remove("TODOIT_FORCE_TAGS")
        .env_remove("TODOIT_FILTER_TAGS")
        .args(args);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    cmd.output().expect("todoit should run")
}

fn run_success(db_path: &Path, envs: &[(&str, &str)], args: &[&str]) -> String {
    let output = run(db_path, envs, args);
    assert!(
        output.status.success(),
        "todoit {:?} failed\nstdout:\n{}\nstderr:\n{}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("stdout should be utf8")
}

fn run_failure(db_path: &Path, envs: &[(&str, &str)], args: &[&str]) -> String {
    let output = run(db_path, envs, args);
    assert!(!output.status.success(), "todoit {args:?} should have failed");
    String::from_utf8(output.stderr).expect("stderr should be utf8")
}

fn parse_json(output: &str) -> Value {
    serde_json::from_str(output.trim()).expect("output should be valid json")
}

#[test]
fn s1_hierarchical_auto_complete() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "p1", "Parent"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "A", "--parent", "p1"]);
    run_success(&db, &[], &["item", "add", "proj1", "b", "B", "--parent", "p1"]);

    run_success(&db, &[], &["item", "status", "proj1", "a", "completed", "--parent", "p1"]);
    run_success(&db, &[], &["item", "status", "proj1", "b", "completed", "--parent", "p1"]);

    let parent = parse_json(&run_success(&db, &[], &["item", "get", "proj1", "p1"]));
    assert_eq!(parent["status"], "completed");

    let history = parse_json(&run_success(&db, &[], &["history", "list", "proj1"]));
    let entries = history.as_array().unwrap();
    assert!(entries.iter().any(|h| h["action"] == "item_status_changed"));
    assert!(entries.iter().any(|h| h["action"] == "list_created"));
}

#[test]
fn s2_direct_mutation_of_non_leaf_rejected() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "p1", "Parent"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "A", "--parent", "p1"]);

    let stderr = run_failure(&db, &[], &["item", "status", "proj1", "p1", "completed"]);
    let envelope = parse_json(&stderr);
    assert_eq!(envelope["error"], "has_children");
}

#[test]
fn s3_cross_list_blocking() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "backend", "Backend"]);
    run_success(&db, &[], &["list", "create", "frontend", "Frontend"]);
    run_success(&db, &[], &["item", "add", "backend", "api", "API"]);
    run_success(&db, &[], &["item", "add", "frontend", "ui", "UI"]);
    run_success(
        &db,
        &[],
        &["dep", "add", "frontend", "ui", "backend", "api", "--kind", "requires"],
    );

    let blocked = run_success(&db, &[], &["dep", "can-start", "frontend", "ui"]);
    assert_eq!(blocked.trim(), "false");

    let output = run(&db, &[], &["item", "next", "frontend"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "(nothing actionable)");

    run_success(&db, &[], &["item", "status", "backend", "api", "completed"]);

    let unblocked = run_success(&db, &[], &["dep", "can-start", "frontend", "ui"]);
    assert_eq!(unblocked.trim(), "true");

    let next = parse_json(&run_success(&db, &[], &["item", "next", "frontend"]));
    assert_eq!(next["item_key"], "ui");
}

#[test]
fn s4_cycle_rejection() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "backend", "Backend"]);
    run_success(&db, &[], &["list", "create", "frontend", "Frontend"]);
    run_success(&db, &[], &["item", "add", "backend", "api", "API"]);
    run_success(&db, &[], &["item", "add", "frontend", "ui", "UI"]);
    run_success(
        &db,
        &[],
        &["dep", "add", "frontend", "ui", "backend", "api", "--kind", "requires"],
    );

    let stderr = run_failure(
        &db,
        &[],
        &["dep", "add", "backend", "api", "frontend", "ui", "--kind", "requires"],
    );
    let envelope = parse_json(&stderr);
    assert_eq!(envelope["error"], "would_create_cycle");
}

#[test]
fn s5_force_tags_isolation() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");
    let forced = [("TODOIT_FORCE_TAGS", "dev,test")];

    run_success(&db, &forced, &["list", "create", "alpha", "Alpha"]);
    run_success(&db, &[], &["list", "create", "beta", "Beta"]);

    let tags = parse_json(&run_success(&db, &forced, &["tag", "list", "alpha"]));
    let names: Vec<&str> = tags.as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"dev"));
    assert!(names.contains(&"test"));

    let lists = parse_json(&run_success(&db, &forced, &["list", "all"]));
    let keys: Vec<&str> = lists.as_array().unwrap().iter().map(|l| l["list_key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["alpha"]);

    let stderr = run_failure(&db, &forced, &["list", "get", "beta"]);
    let envelope = parse_json(&stderr);
    assert_eq!(envelope["error"], "not_found");

    let stderr = run_failure(&db, &forced, &["tag", "remove", "alpha", "dev"]);
    let envelope = parse_json(&stderr);
    assert_eq!(envelope["error"], "cannot_remove_force_tag");
}

#[test]
fn s6_natural_ordering() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    for key in ["scene_10", "scene_2", "scene_1"] {
        run_success(&db, &[], &["item", "add", "proj1", key, key]);
    }

    let items = parse_json(&run_success(&db, &[], &["item", "list", "proj1"]));
    let keys: Vec<&str> = items.as_array().unwrap().iter().map(|i| i["item_key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["scene_1", "scene_2", "scene_10"]);
}

#[test]
fn schema_command_prints_persisted_table_layout() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");
    let stdout = run_success(&db, &[], &["schema"]);
    assert!(stdout.contains("todo_lists"));
    assert!(stdout.contains("todo_items"));
    assert!(stdout.contains("item_dependencies"));
}

#[test]
fn list_archive_then_unarchive_round_trips_status() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    let archived = parse_json(&run_success(&db, &[], &["list", "archive", "proj1"]));
    assert_eq!(archived["status"], "archived");

    let unarchived = parse_json(&run_success(&db, &[], &["list", "unarchive", "proj1"]));
    assert_eq!(unarchived["status"], "active");
}

#[test]
fn item_edit_changes_content_without_touching_status() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "Original"]);
    run_success(&db, &[], &["item", "status", "proj1", "a", "in_progress"]);

    let edited = parse_json(&run_success(
        &db,
        &[],
        &["item", "edit", "proj1", "a", "--content", "Updated"],
    ));
    assert_eq!(edited["content"], "Updated");
    assert_eq!(edited["status"], "in_progress");
}

#[test]
fn item_subtasks_and_tree_reflect_hierarchy() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "p1", "Parent"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "A", "--parent", "p1"]);
    run_success(&db, &[], &["item", "add", "proj1", "b", "B", "--parent", "p1"]);

    let subtasks = parse_json(&run_success(&db, &[], &["item", "subtasks", "proj1", "p1"]));
    let keys: Vec<&str> = subtasks.as_array().unwrap().iter().map(|i| i["item_key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["a", "b"]);

    let tree = parse_json(&run_success(&db, &[], &["item", "tree", "proj1", "a", "--parent", "p1"]));
    let path: Vec<&str> = tree["path"].as_array().unwrap().iter().map(|i| i["item_key"].as_str().unwrap()).collect();
    assert_eq!(path, vec!["p1", "a"]);
}

#[test]
fn item_find_matches_by_property_value() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "A"]);
    run_success(&db, &[], &["item", "add", "proj1", "b", "B"]);
    run_success(&db, &[], &["property", "item-set", "proj1", "a", "priority", "high"]);

    let found = parse_json(&run_success(
        &db,
        &[],
        &["item", "find", "proj1", "priority", "high"],
    ));
    let keys: Vec<&str> = found.as_array().unwrap().iter().map(|i| i["item_key"].as_str().unwrap()).collect();
    assert_eq!(keys, vec!["a"]);
}

#[test]
fn item_find_status_groups_matching_parents() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "p1", "Parent"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "A", "--parent", "p1"]);
    run_success(&db, &[], &["item", "status", "proj1", "a", "completed", "--parent", "p1"]);

    let groups = parse_json(&run_success(
        &db,
        &[],
        &["item", "find-status", "proj1", "a=completed"],
    ));
    let parents: Vec<&str> = groups.as_array().unwrap().iter().map(|g| g["parent"]["item_key"].as_str().unwrap()).collect();
    assert_eq!(parents, vec!["p1"]);
}

#[test]
fn item_state_list_remove_and_clear() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "A"]);
    run_success(&db, &[], &["item", "status", "proj1", "a", "completed", "--state", "reviewed=true"]);

    let states = parse_json(&run_success(&db, &[], &["item", "state", "list", "proj1", "a"]));
    assert_eq!(states["reviewed"], true);

    run_success(&db, &[], &["item", "state", "remove", "proj1", "a", "reviewed"]);
    let after_remove = parse_json(&run_success(&db, &[], &["item", "state", "list", "proj1", "a"]));
    assert!(after_remove.as_object().unwrap().is_empty());

    run_success(&db, &[], &["item", "status", "proj1", "a", "completed", "--state", "reviewed=true"]);
    run_success(&db, &[], &["item", "state", "clear", "proj1", "a"]);
    let after_clear = parse_json(&run_success(&db, &[], &["item", "state", "list", "proj1", "a"]));
    assert!(after_clear.as_object().unwrap().is_empty());
}

#[test]
fn export_then_import_round_trips_through_stdin() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("todo.db");
    let db2 = dir.path().join("todo2.db");

    run_success(&db, &[], &["list", "create", "proj1", "Project One"]);
    run_success(&db, &[], &["item", "add", "proj1", "a", "Task A"]);
    run_success(&db, &[], &["item", "status", "proj1", "a", "completed"]);

    let export = run_success(&db, &[], &["io", "export", "proj1"]);

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_todoit"));
    cmd.env("TODOIT_DB_PATH", &db2)
        .env("OUTPUT_FORMAT", "json")
        .env_remove("TODOIT_FORCE_TAGS")
        .env_remove("TODOIT_FILTER_TAGS")
        .args(["io", "import"]);
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    let mut child = cmd.spawn().unwrap();
    use std::io::Write;
    child.stdin.take().unwrap().write_all(export.as_bytes()).unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let item = parse_json(&run_success(&db2, &[], &["item", "get", "proj1", "a"]));
    assert_eq!(item["status"], "completed");
}
