//! rule model: compile a [`RuleSet`] into shared, runtime-stateful rules
//!
//! loading never fails as a whole. every problem is collected as a
//! [`RuleLoadError`] and the offending rule is left out of the active set.

pub mod activity;
pub mod resolved;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::schema::{EngineSettings, RuleConfig, RuleGroup, RuleSet};
use crate::query::MatchOptions;
use crate::selector::{compile, CompileError, Selector};

pub use activity::{ActivityRule, ContextChange, RuleResolver};
pub use resolved::{ResolvedRule, RuleId, Scope, Status, Timing};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleLoadError {
    #[error("rule {rule}: selector `{selector}`: {error}")]
    Compile {
        rule: RuleId,
        selector: String,
        error: CompileError,
    },

    #[error("rule {rule}: `{field}` must not be negative (got {value})")]
    NegativeTiming {
        rule: RuleId,
        field: &'static str,
        value: i64,
    },

    #[error("rule {rule}: preKeys references unknown key {key}")]
    UnknownPreKey { rule: RuleId, key: i64 },

    #[error("rule {rule}: preKeys form a cycle")]
    CyclicPreKeys { rule: RuleId },

    #[error("rule {rule}: `{field}` references unknown key {key}")]
    UnknownSlotKey {
        rule: RuleId,
        field: &'static str,
        key: i64,
    },

    #[error("rule {rule}: needs at least one of `matches` or `anyMatches`")]
    EmptyMatches { rule: RuleId },

    #[error("rule {rule}: duplicate key in group")]
    DuplicateKey { rule: RuleId },
}

impl RuleLoadError {
    pub fn rule(&self) -> &RuleId {
        match self {
            RuleLoadError::Compile { rule, .. }
            | RuleLoadError::NegativeTiming { rule, .. }
            | RuleLoadError::UnknownPreKey { rule, .. }
            | RuleLoadError::CyclicPreKeys { rule }
            | RuleLoadError::UnknownSlotKey { rule, .. }
            | RuleLoadError::EmptyMatches { rule }
            | RuleLoadError::DuplicateKey { rule } => rule,
        }
    }
}

/// the active set plus everything that was rejected
#[derive(Debug, Default)]
pub struct LoadedRules {
    pub rules: Vec<Arc<ResolvedRule>>,
    pub errors: Vec<RuleLoadError>,
}

impl LoadedRules {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// compile every enabled group; `now` starts each rule's match window
pub fn load(set: &RuleSet, settings: &EngineSettings, now: i64) -> LoadedRules {
    let mut loaded = LoadedRules::default();

    for group in set.groups.iter().filter(|g| g.enable) {
        let (rules, errors) = load_group(group, settings, now);
        loaded.rules.extend(rules.into_iter().map(Arc::new));
        loaded.errors.extend(errors);
    }

    for err in &loaded.errors {
        warn!(rule = %err.rule(), "{}", err);
    }
    debug!(
        active = loaded.rules.len(),
        rejected = loaded.errors.len(),
        "rules loaded"
    );
    loaded
}

fn load_group(
    group: &RuleGroup,
    settings: &EngineSettings,
    now: i64,
) -> (Vec<ResolvedRule>, Vec<RuleLoadError>) {
    let app = group.app.as_deref();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut compiled: Vec<ResolvedRule> = Vec::new();
    let mut configs: HashMap<i64, &RuleConfig> = HashMap::new();

    // pass 1: each rule on its own
    for config in &group.rules {
        let id = RuleId::new(app, group.key, config.key);
        if !seen.insert(config.key) {
            errors.push(RuleLoadError::DuplicateKey { rule: id });
            continue;
        }
        configs.insert(config.key, config);
        match compile_rule(id, group, config, settings, now) {
            Ok(rule) => compiled.push(rule),
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    // pass 2: key references within the group
    let cyclic = cyclic_keys(&configs);
    let valid: HashSet<i64> = compiled.iter().map(|r| r.id.key).collect();
    let mut rejected = HashSet::new();

    for rule in &compiled {
        let config = configs[&rule.id.key];
        for key in &config.pre_keys {
            if !configs.contains_key(key) {
                errors.push(RuleLoadError::UnknownPreKey {
                    rule: rule.id.clone(),
                    key: *key,
                });
                rejected.insert(rule.id.key);
            }
        }
        if cyclic.contains(&rule.id.key) {
            errors.push(RuleLoadError::CyclicPreKeys {
                rule: rule.id.clone(),
            });
            rejected.insert(rule.id.key);
        }
        for (field, key) in [
            ("actionCdKey", config.action_cd_key),
            ("actionMaximumKey", config.action_maximum_key),
        ] {
            if let Some(key) = key {
                if !valid.contains(&key) {
                    errors.push(RuleLoadError::UnknownSlotKey {
                        rule: rule.id.clone(),
                        field,
                        key,
                    });
                    rejected.insert(rule.id.key);
                }
            }
        }
    }

    compiled.retain(|r| !rejected.contains(&r.id.key));

    let cd_owner = |key: i64| resolve_owner(key, &configs, |c| c.action_cd_key);
    let max_owner = |key: i64| resolve_owner(key, &configs, |c| c.action_maximum_key);
    let cd_slots: HashMap<i64, _> = compiled
        .iter()
        .map(|r| (r.id.key, r.cooldown_slot()))
        .collect();
    let count_slots: HashMap<i64, _> = compiled
        .iter()
        .map(|r| (r.id.key, r.count_slot()))
        .collect();

    let rules = compiled
        .into_iter()
        .map(|mut rule| {
            let key = rule.id.key;
            let owner = cd_owner(key);
            if owner != key {
                if let Some(slot) = cd_slots.get(&owner) {
                    rule = rule.with_cooldown_slot(slot.clone());
                }
            }
            let owner = max_owner(key);
            if owner != key {
                if let Some(slot) = count_slots.get(&owner) {
                    rule = rule.with_count_slot(slot.clone());
                }
            }
            rule
        })
        .collect();

    (rules, errors)
}

fn compile_rule(
    id: RuleId,
    group: &RuleGroup,
    config: &RuleConfig,
    settings: &EngineSettings,
    now: i64,
) -> Result<ResolvedRule, Vec<RuleLoadError>> {
    let mut errors = Vec::new();

    let mut timings = vec![
        ("matchDelay", config.match_delay),
        ("actionDelay", config.action_delay),
        ("actionCd", config.action_cd),
        ("priorityTime", config.priority_time),
        ("priorityActionMaximum", config.priority_action_maximum),
    ];
    if let Some(v) = config.action_maximum {
        timings.push(("actionMaximum", v));
    }
    if let Some(v) = config.match_time {
        timings.push(("matchTime", v));
    }
    for (field, value) in timings {
        if value < 0 {
            errors.push(RuleLoadError::NegativeTiming {
                rule: id.clone(),
                field,
                value,
            });
        }
    }

    if config.matches.is_empty() && config.any_matches.is_empty() {
        errors.push(RuleLoadError::EmptyMatches { rule: id.clone() });
    }

    let mut compile_all = |sources: &[String]| -> Vec<Selector> {
        sources
            .iter()
            .filter_map(|source| match compile(source) {
                Ok(selector) => Some(selector),
                Err(error) => {
                    errors.push(RuleLoadError::Compile {
                        rule: id.clone(),
                        selector: source.clone(),
                        error,
                    });
                    None
                }
            })
            .collect()
    };
    let matches = compile_all(&config.matches);
    let exclude_matches = compile_all(&config.exclude_matches);
    let any_matches = compile_all(&config.any_matches);

    if !errors.is_empty() {
        return Err(errors);
    }

    let timing = Timing {
        match_delay: config.match_delay,
        action_delay: config.action_delay,
        action_cd: config.action_cd,
        action_maximum: config.action_maximum,
        match_time: config.match_time,
        priority_time: config.priority_time,
        priority_action_maximum: config.priority_action_maximum,
    };
    let options = MatchOptions {
        quick_find: config.quick_find.unwrap_or(settings.quick_find),
        fast_query: config.fast_query.unwrap_or(settings.fast_query),
    };
    let scope = Scope {
        activity_ids: config
            .activity_ids
            .clone()
            .unwrap_or_else(|| group.activity_ids.clone()),
        exclude_activity_ids: config
            .exclude_activity_ids
            .clone()
            .unwrap_or_else(|| group.exclude_activity_ids.clone()),
        apps: group.apps.clone(),
        exclude_apps: group.exclude_apps.clone(),
    };

    Ok(ResolvedRule::new(
        id,
        config.name.clone(),
        matches,
        exclude_matches,
        any_matches,
        timing,
        config.pre_keys.clone(),
        config.reset_match,
        config.match_root,
        options,
        config.action.clone(),
        scope,
        now,
    ))
}

/// follow slot-key links to the rule that owns the slot
fn resolve_owner(
    key: i64,
    configs: &HashMap<i64, &RuleConfig>,
    link: impl Fn(&RuleConfig) -> Option<i64>,
) -> i64 {
    let mut current = key;
    for _ in 0..configs.len() {
        match configs.get(&current).and_then(|c| link(*c)) {
            Some(next) if next != current && configs.contains_key(&next) => current = next,
            _ => break,
        }
    }
    current
}

/// keys of every rule that sits on a preKeys cycle
fn cyclic_keys(configs: &HashMap<i64, &RuleConfig>) -> HashSet<i64> {
    let mut cyclic = HashSet::new();
    for &start in configs.keys() {
        let mut stack: Vec<i64> = configs[&start].pre_keys.clone();
        let mut visited = HashSet::new();
        while let Some(key) = stack.pop() {
            if key == start {
                cyclic.insert(start);
                break;
            }
            if !visited.insert(key) {
                continue;
            }
            if let Some(config) = configs.get(&key) {
                stack.extend(config.pre_keys.iter().copied());
            }
        }
    }
    cyclic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RuleGroup;

    fn group(rules: Vec<RuleConfig>) -> RuleSet {
        RuleSet {
            groups: vec![RuleGroup {
                key: 1,
                name: None,
                app: Some("app".into()),
                enable: true,
                activity_ids: vec![],
                exclude_activity_ids: vec![],
                apps: vec![],
                exclude_apps: vec![],
                rules,
            }],
        }
    }

    fn rule(key: i64) -> RuleConfig {
        RuleConfig {
            key,
            matches: vec!["[text='OK']".into()],
            ..RuleConfig::default()
        }
    }

    #[test]
    fn test_load_valid_group() {
        let loaded = load(
            &group(vec![rule(0), rule(1)]),
            &EngineSettings::default(),
            0,
        );
        assert!(loaded.is_clean());
        assert_eq!(loaded.rules.len(), 2);
        assert_eq!(loaded.rules[1].id, RuleId::new(Some("app"), 1, 1));
    }

    #[test]
    fn test_bad_rules_are_inert() {
        let bad_selector = RuleConfig {
            matches: vec!["[text=".into()],
            ..rule(0)
        };
        let negative = RuleConfig {
            match_delay: -5,
            ..rule(1)
        };
        let empty = RuleConfig {
            matches: vec![],
            ..rule(2)
        };
        let loaded = load(
            &group(vec![bad_selector, negative, empty, rule(3), rule(3)]),
            &EngineSettings::default(),
            0,
        );
        assert_eq!(loaded.rules.len(), 1);
        assert_eq!(loaded.rules[0].id.key, 3);
        assert!(matches!(loaded.errors[0], RuleLoadError::Compile { .. }));
        assert!(matches!(
            loaded.errors[1],
            RuleLoadError::NegativeTiming { field: "matchDelay", .. }
        ));
        assert!(matches!(loaded.errors[2], RuleLoadError::EmptyMatches { .. }));
        assert!(matches!(loaded.errors[3], RuleLoadError::DuplicateKey { .. }));
    }

    #[test]
    fn test_pre_key_errors() {
        let unknown = RuleConfig {
            pre_keys: vec![9],
            ..rule(0)
        };
        let a = RuleConfig {
            pre_keys: vec![2],
            ..rule(1)
        };
        let b = RuleConfig {
            pre_keys: vec![1],
            ..rule(2)
        };
        let ok = RuleConfig {
            pre_keys: vec![1],
            ..rule(3)
        };
        let loaded = load(&group(vec![unknown, a, b, ok]), &EngineSettings::default(), 0);
        let keys: Vec<i64> = loaded.rules.iter().map(|r| r.id.key).collect();
        assert_eq!(keys, vec![3]);
        assert!(loaded
            .errors
            .iter()
            .any(|e| matches!(e, RuleLoadError::UnknownPreKey { key: 9, .. })));
        assert_eq!(
            loaded
                .errors
                .iter()
                .filter(|e| matches!(e, RuleLoadError::CyclicPreKeys { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_shared_slots_are_linked() {
        let owner = rule(0);
        let sharer = RuleConfig {
            action_cd_key: Some(0),
            action_maximum_key: Some(0),
            action_maximum: Some(1),
            ..rule(1)
        };
        let loaded = load(&group(vec![owner, sharer]), &EngineSettings::default(), 0);
        assert!(loaded.is_clean());
        let (a, b) = (&loaded.rules[0], &loaded.rules[1]);
        a.trigger(100);
        assert_eq!(b.status(200, None), Status::MaxCountReached);
        assert_eq!(b.action_count(), 1);
        assert_eq!(b.own_count(), 0);
    }

    #[test]
    fn test_unknown_slot_key() {
        let sharer = RuleConfig {
            action_cd_key: Some(7),
            ..rule(1)
        };
        let loaded = load(&group(vec![rule(0), sharer]), &EngineSettings::default(), 0);
        assert_eq!(loaded.rules.len(), 1);
        assert!(matches!(
            loaded.errors[0],
            RuleLoadError::UnknownSlotKey { field: "actionCdKey", key: 7, .. }
        ));
    }

    #[test]
    fn test_settings_supply_match_options() {
        let settings = EngineSettings {
            quick_find: true,
            ..EngineSettings::default()
        };
        let explicit = RuleConfig {
            quick_find: Some(false),
            ..rule(1)
        };
        let loaded = load(&group(vec![rule(0), explicit]), &settings, 0);
        assert!(loaded.rules[0].options.quick_find);
        assert!(!loaded.rules[1].options.quick_find);
    }

    #[test]
    fn test_disabled_group_is_skipped() {
        let mut set = group(vec![rule(0)]);
        set.groups[0].enable = false;
        let loaded = load(&set, &EngineSettings::default(), 0);
        assert!(loaded.rules.is_empty());
        assert!(loaded.is_clean());
    }
}
