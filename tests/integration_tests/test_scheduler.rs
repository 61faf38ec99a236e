// end-to-end scheduler runs over the dialog fixture

use std::sync::Arc;
use std::time::{Duration, Instant};

use axsel::action::{Action, RecordingExecutor};
use axsel::config::{self, EngineSettings};
use axsel::scheduler::{Scheduler, SchedulerHandle, TreeEvent};
use axsel::tree::fixture::{FixtureNode, FixtureTree};

use crate::common::dialog;

fn settings() -> EngineSettings {
    EngineSettings {
        follow_up_delay_ms: 20,
        ..EngineSettings::default()
    }
}

fn start(
    rules: &str,
) -> (
    Arc<FixtureTree>,
    Arc<RecordingExecutor<FixtureNode>>,
    SchedulerHandle<FixtureNode>,
) {
    let tree = Arc::new(dialog());
    let exec: Arc<RecordingExecutor<FixtureNode>> = Arc::new(RecordingExecutor::new());
    let config = config::parse(rules).unwrap();
    let handle = Scheduler::new(tree.clone(), exec.clone())
        .with_settings(settings())
        .with_rules(config.rules)
        .start()
        .unwrap();
    (tree, exec, handle)
}

async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn targets(tree: &FixtureTree, exec: &RecordingExecutor<FixtureNode>) -> Vec<String> {
    exec.performed()
        .iter()
        .map(|(node, _)| tree.describe(node))
        .collect()
}

#[tokio::test]
async fn test_clicks_confirm_after_ok() {
    let (tree, exec, handle) = start(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["Button[text=`OK`] + [vid=`confirm`]"], actionMaximum: 1 },
        ] }] } }"#,
    );

    handle.foreground("app", Some("app.Dialog"));
    handle.send(TreeEvent::content_changed("app", None));
    assert!(wait_until(|| exec.count() == 1).await);

    assert_eq!(targets(&tree, &exec), vec!["Button#confirm \"Confirm\""]);
    assert_eq!(exec.performed()[0].1, Action::Click);

    // maximum reached: the rule stays quiet
    for _ in 0..3 {
        handle.send(TreeEvent::content_changed("app", None));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(exec.count(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_match_delay_defers_action() {
    let (_tree, exec, handle) = start(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='Cancel']"], matchDelay: 300, actionMaximum: 1 },
        ] }] } }"#,
    );

    let begun = Instant::now();
    handle.foreground("app", None);
    handle.send(TreeEvent::content_changed("app", None));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(exec.count(), 0);

    // no further event: the delay timer alone brings the rule back
    assert!(wait_until(|| exec.count() == 1).await);
    assert!(begun.elapsed() >= Duration::from_millis(250));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_pre_keys_chain_through_follow_up() {
    let (tree, exec, handle) = start(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='OK']"], actionMaximum: 1 },
            { key: 1, matches: ["[vid='confirm']"], preKeys: [0], actionMaximum: 1 },
        ] }] } }"#,
    );

    handle.foreground("app", None);
    handle.send(TreeEvent::content_changed("app", None));
    assert!(wait_until(|| exec.count() == 2).await);

    assert_eq!(
        targets(&tree, &exec),
        vec!["Button \"OK\"", "Button#confirm \"Confirm\""]
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn test_app_change_restores_maximum() {
    let (_tree, exec, handle) = start(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='OK']"], actionMaximum: 1, actionCd: 0 },
        ] }] } }"#,
    );

    handle.foreground("app", None);
    handle.send(TreeEvent::content_changed("app", None));
    assert!(wait_until(|| exec.count() == 1).await);

    handle.foreground("launcher", None);
    handle.foreground("app", None);
    // let the query lane publish the new context before the next event
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.send(TreeEvent::content_changed("app", None));
    assert!(wait_until(|| exec.count() == 2).await);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_rules_for_other_apps_stay_idle() {
    let (_tree, exec, handle) = start(
        r#"{ rules: { groups: [{ key: 1, app: "other", rules: [
            { key: 0, matches: ["[text='OK']"] },
        ] }] } }"#,
    );

    handle.foreground("app", None);
    for _ in 0..3 {
        handle.send(TreeEvent::content_changed("app", None));
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(exec.count(), 0);
    assert_eq!(handle.stats().evaluations, 0);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_hot_reload_replaces_rules() {
    let (tree, exec, handle) = start(r#"{}"#);

    handle.foreground("app", None);
    handle.send(TreeEvent::content_changed("app", None));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(exec.count(), 0);

    let config = config::parse(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='Cancel']"], actionMaximum: 1 },
        ] }] } }"#,
    )
    .unwrap();
    assert!(handle.set_rules(config.rules));
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.send(TreeEvent::content_changed("app", None));
    assert!(wait_until(|| exec.count() == 1).await);
    assert_eq!(targets(&tree, &exec), vec!["Button#cancel \"Cancel\""]);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_action_is_counted() {
    let (_tree, exec, handle) = start(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='OK']"], actionMaximum: 1 },
        ] }] } }"#,
    );
    exec.set_failing(true);

    handle.foreground("app", None);
    handle.send(TreeEvent::content_changed("app", None));
    assert!(wait_until(|| handle.stats().failed_actions >= 1).await);
    assert_eq!(handle.stats().actions, 0);
    handle.shutdown().await;
}
