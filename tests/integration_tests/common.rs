// shared utilities for integration tests

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use axsel::tree::fixture::FixtureTree;
use serde_json::{json, Value};

/// create a temporary directory for test files
pub fn create_test_dir(name: &str) -> PathBuf {
    let base = env::temp_dir().join("axsel_integration_tests");
    let dir = base.join(name);

    // clean up if exists
    if dir.exists() {
        fs::remove_dir_all(&dir).ok();
    }

    fs::create_dir_all(&dir).expect("Failed to create test directory");
    dir
}

/// clean up a test directory
pub fn cleanup_test_dir(path: &Path) {
    if path.exists() {
        fs::remove_dir_all(path).ok();
    }
}

/// run axsel with custom environment
pub fn run_axsel_with_env(args: &[&str], env_vars: &[(&str, &str)]) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_axsel"));
    cmd.args(args);
    cmd.env_remove("AXSEL_CONFIG");
    cmd.env_remove("AXSEL_LOG");

    for (key, value) in env_vars {
        cmd.env(key, value);
    }

    cmd.output().expect("Failed to run axsel")
}

/// a dialog screen: a scrolling list plus a button bar
///
/// ```text
/// Root
/// ├── List
/// │   ├── Item > Label "one"
/// │   ├── Item > Label "two"
/// │   └── Item > Label "three"
/// └── Bar
///     ├── Button "Cancel"  (app:id/cancel)
///     ├── Button "OK"
///     └── Button "Confirm" (app:id/confirm)
/// ```
pub fn dialog_json() -> Value {
    let item = |label: &str| {
        json!({
            "name": "android.widget.FrameLayout",
            "children": [{ "name": "android.widget.TextView", "text": label }]
        })
    };
    json!({
        "name": "android.widget.FrameLayout",
        "id": "app:id/root",
        "children": [
            {
                "name": "android.widget.ListView",
                "id": "app:id/list",
                "children": [item("one"), item("two"), item("three")]
            },
            {
                "name": "android.widget.LinearLayout",
                "id": "app:id/bar",
                "children": [
                    { "name": "android.widget.Button", "id": "app:id/cancel", "text": "Cancel", "clickable": true },
                    { "name": "android.widget.Button", "text": "OK", "clickable": true },
                    { "name": "android.widget.Button", "id": "app:id/confirm", "text": "Confirm", "clickable": true }
                ]
            }
        ]
    })
}

pub fn dialog() -> FixtureTree {
    FixtureTree::from_value(dialog_json()).expect("valid fixture")
}
