// CLI surface, run as a subprocess

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::common::{cleanup_test_dir, create_test_dir, dialog_json, run_axsel_with_env};

fn write_tree(dir: &Path) -> PathBuf {
    let path = dir.join("tree.json");
    fs::write(&path, dialog_json().to_string()).unwrap();
    path
}

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("config.json5");
    fs::write(&path, content).unwrap();
    path
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| panic!("{}: {}", e, stdout))
}

#[test]
fn test_check_reports_canonical_form() {
    let output = run_axsel_with_env(&["check", "--json", "Button[text=`OK`]+[vid=`confirm`]"], &[]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    let compiled = &json["result"]["compiled"][0];
    assert_eq!(compiled["canonical"], "Button[text = \"OK\"] + [vid = \"confirm\"]");
    assert_eq!(compiled["segments"], 2);
}

#[test]
fn test_check_compile_error_exit_code() {
    let output = run_axsel_with_env(&["check", "--json", "[text="], &[]);
    assert_eq!(output.status.code(), Some(6));

    let json = stdout_json(&output);
    assert_eq!(json["result"]["errors"].as_array().unwrap().len(), 1);
}

#[test]
fn test_query_finds_target() {
    let dir = create_test_dir("cli_query");
    let tree = write_tree(&dir);

    let output = run_axsel_with_env(
        &[
            "query",
            "--json",
            "--tree",
            tree.to_str().unwrap(),
            "Button[text=`OK`] + [vid=`confirm`]",
        ],
        &[],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["result"]["matched"], true);
    assert_eq!(json["result"]["target"]["id"], "app:id/confirm");
    assert_eq!(json["result"]["chain"].as_array().unwrap().len(), 2);

    cleanup_test_dir(&dir);
}

#[test]
fn test_query_no_match_exit_code() {
    let dir = create_test_dir("cli_query_none");
    let tree = write_tree(&dir);

    let output = run_axsel_with_env(
        &["query", "--json", "--tree", tree.to_str().unwrap(), "[text='Retry']"],
        &[],
    );
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["result"]["matched"], false);

    cleanup_test_dir(&dir);
}

#[test]
fn test_rules_verify_valid_config_from_env() {
    let dir = create_test_dir("cli_verify_ok");
    let config = write_config(
        &dir,
        r#"{
            // json5 is accepted
            rules: { groups: [{ key: 1, app: "app", rules: [{ key: 0, matches: ["[text='OK']"] }] }] },
        }"#,
    );

    let output = run_axsel_with_env(
        &["rules", "verify", "--json"],
        &[("AXSEL_CONFIG", config.to_str().unwrap())],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json(&output)["result"]["valid"], true);

    cleanup_test_dir(&dir);
}

#[test]
fn test_rules_verify_reports_errors() {
    let dir = create_test_dir("cli_verify_bad");
    let config = write_config(
        &dir,
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[txet='OK']"] },
            { key: 1, matches: ["[text='OK']"], actionCdKey: 9 },
        ] }] } }"#,
    );

    let output = run_axsel_with_env(
        &["rules", "verify", "--json", "--config", config.to_str().unwrap()],
        &[],
    );
    assert_eq!(output.status.code(), Some(5));

    let json = stdout_json(&output);
    assert_eq!(json["error"]["code"], -32005);
    let details = json["error"]["data"]["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);

    cleanup_test_dir(&dir);
}

#[test]
fn test_rules_list_shows_active_rules() {
    let dir = create_test_dir("cli_list");
    let config = write_config(
        &dir,
        r#"{ rules: { groups: [{ key: 3, app: "app", rules: [
            { key: 0, name: "confirm dialog", matches: ["[vid='confirm']"] },
        ] }] } }"#,
    );

    let output = run_axsel_with_env(
        &["rules", "list", "--json", "--config", config.to_str().unwrap()],
        &[],
    );
    assert!(output.status.success());

    let json = stdout_json(&output);
    let rules = json["result"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["id"], "app/3/0");
    assert_eq!(rules[0]["name"], "confirm dialog");

    cleanup_test_dir(&dir);
}

#[test]
fn test_simulate_fires_rule() {
    let dir = create_test_dir("cli_simulate");
    let tree = write_tree(&dir);
    let config = write_config(
        &dir,
        r#"{
            settings: { follow_up_delay_ms: 20 },
            rules: { groups: [{ key: 1, app: "app", rules: [
                { key: 0, matches: ["Button[text=`OK`] + [vid=`confirm`]"], actionMaximum: 1 },
            ] }] },
        }"#,
    );

    let output = run_axsel_with_env(
        &[
            "simulate",
            "--json",
            "--config",
            config.to_str().unwrap(),
            "--tree",
            tree.to_str().unwrap(),
            "--app",
            "app",
            "--events",
            "3",
            "--interval-ms",
            "100",
        ],
        &[],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    let fired = json["result"]["fired"].as_array().unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0]["target"], "Button#confirm \"Confirm\"");
    assert_eq!(fired[0]["action"], "click");

    cleanup_test_dir(&dir);
}

#[test]
fn test_missing_config_flag_fails() {
    let output = run_axsel_with_env(
        &["rules", "list", "--config", "/nonexistent/axsel.json"],
        &[],
    );
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_bad_arguments_exit_code() {
    let output = run_axsel_with_env(&["query", "--no-such-flag"], &[]);
    assert_eq!(output.status.code(), Some(4));
}
