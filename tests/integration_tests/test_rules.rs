// rule loading and status transitions driven through the resolver

use std::sync::Arc;

use axsel::config;
use axsel::rules::{self, ContextChange, ResolvedRule, RuleLoadError, RuleResolver, Status};

fn resolver(source: &str) -> RuleResolver {
    let config = config::parse(source).unwrap();
    let loaded = rules::load(&config.rules, &config.settings, 0);
    assert!(loaded.is_clean(), "{:?}", loaded.errors);
    RuleResolver::new(loaded.rules)
}

fn rule(resolver: &RuleResolver, key: i64) -> Arc<ResolvedRule> {
    resolver
        .rules()
        .iter()
        .find(|r| r.id.key == key)
        .cloned()
        .unwrap()
}

#[test]
fn test_match_delay_counts_from_foreground_change() {
    let mut resolver = resolver(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='Skip']"], matchDelay: 500 },
        ] }] } }"#,
    );
    resolver.update(Some("app"), Some("app.Splash"), 1000);
    let r = rule(&resolver, 0);

    assert_eq!(r.status(1200, None), Status::InMatchDelay);
    assert_eq!(r.match_delay_remaining(1200), 300);
    assert_eq!(r.status(1500, None), Status::Ok);
}

#[test]
fn test_action_maximum_resets_on_app_change_only_for_app_scope() {
    let mut resolver = resolver(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='Skip']"], actionMaximum: 1, resetMatch: "app" },
            { key: 1, matches: ["[text='Close']"], actionMaximum: 1 },
        ] }] } }"#,
    );
    resolver.update(Some("app"), Some("app.Main"), 0);
    let per_app = rule(&resolver, 0);
    let per_page = rule(&resolver, 1);
    per_app.trigger(10);
    per_page.trigger(10);
    assert_eq!(per_app.status(20, None), Status::MaxCountReached);

    // page change: only the page-scoped rule starts over
    assert_eq!(
        resolver.update(Some("app"), Some("app.Detail"), 2000),
        ContextChange::ActivityChanged
    );
    assert_eq!(per_app.status(2000, None), Status::MaxCountReached);
    assert_eq!(per_page.status(2000, None), Status::Ok);

    // leaving and returning to the app clears both
    resolver.update(Some("launcher"), None, 3000);
    resolver.update(Some("app"), Some("app.Detail"), 4000);
    assert_eq!(per_app.action_count(), 0);
    assert_eq!(per_app.status(4000, None), Status::Ok);
}

#[test]
fn test_shared_cooldown_key() {
    let mut resolver = resolver(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='A']"], actionCd: 5000 },
            { key: 1, matches: ["[text='B']"], actionCdKey: 0 },
        ] }] } }"#,
    );
    resolver.update(Some("app"), None, 0);
    let owner = rule(&resolver, 0);
    let follower = rule(&resolver, 1);

    owner.trigger(2000);
    assert_eq!(follower.status(2500, None), Status::InCooldown);
    // the follower keeps its own cooldown length
    assert_eq!(follower.status(3100, None), Status::Ok);
    assert_eq!(owner.status(3100, None), Status::InCooldown);
}

#[test]
fn test_shared_maximum_key() {
    let mut resolver = resolver(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='A']"], actionMaximum: 1 },
            { key: 1, matches: ["[text='B']"], actionMaximum: 1, actionMaximumKey: 0 },
        ] }] } }"#,
    );
    resolver.update(Some("app"), None, 0);
    rule(&resolver, 1).trigger(10);

    assert_eq!(rule(&resolver, 0).status(5000, None), Status::MaxCountReached);
    assert_eq!(rule(&resolver, 0).own_count(), 0);
}

#[test]
fn test_pre_keys_wait_for_sibling() {
    let mut resolver = resolver(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='Open']"] },
            { key: 1, matches: ["[text='Confirm']"], preKeys: [0] },
        ] }] } }"#,
    );
    resolver.update(Some("app"), None, 0);
    let first = rule(&resolver, 0);
    let second = rule(&resolver, 1);

    assert_eq!(second.status(100, resolver.last_triggered()), Status::NeedsPrerequisite);
    first.trigger(100);
    resolver.record_trigger(&first.id);
    assert_eq!(second.status(100, resolver.last_triggered()), Status::Ok);
}

#[test]
fn test_invalid_rules_are_left_out() {
    let config = config::parse(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='ok']"] },
            { key: 1, matches: ["[txet='ok']"] },
            { key: 2, matches: ["[text='ok']"], preKeys: [3, 4] },
            { key: 3, matches: ["[text='ok']"], preKeys: [4] },
            { key: 4, matches: ["[text='ok']"], preKeys: [3] },
        ] }] } }"#,
    )
    .unwrap();
    let loaded = rules::load(&config.rules, &config.settings, 0);

    let keys: Vec<i64> = loaded.rules.iter().map(|r| r.id.key).collect();
    assert_eq!(keys, vec![0, 2]);
    assert!(loaded
        .errors
        .iter()
        .any(|e| matches!(e, RuleLoadError::Compile { .. })));
    assert!(loaded
        .errors
        .iter()
        .any(|e| matches!(e, RuleLoadError::CyclicPreKeys { .. })));
}

#[test]
fn test_huge_timings_load_and_evaluate() {
    let mut resolver = resolver(
        r#"{ rules: { groups: [{ key: 1, app: "app", rules: [
            { key: 0, matches: ["[text='A']"], matchTime: 9223372036854775807, priorityTime: 9223372036854775807 },
            { key: 1, matches: ["[text='B']"], actionDelay: 9223372036854775807 },
        ] }] } }"#,
    );
    resolver.update(Some("app"), None, 1_000);
    let window = rule(&resolver, 0);
    let delayed = rule(&resolver, 1);

    assert_eq!(window.status(5_000, None), Status::Ok);
    assert!(window.is_priority(5_000, None));

    assert!(delayed.arm_action_delay(5_000));
    assert_eq!(delayed.status(6_000, None), Status::InActionDelay);
    assert_eq!(delayed.action_delay_remaining(6_000), Some(i64::MAX - 6_000));
}
