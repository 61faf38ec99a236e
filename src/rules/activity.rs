//! foreground-context snapshots and the resolver that maintains them

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::schema::ResetMatch;

use super::resolved::{ResolvedRule, RuleId, Status};

/// rules applicable to one foreground context; recreated, never mutated
#[derive(Debug, Clone, Default)]
pub struct ActivityRule {
    pub app: Option<String>,
    pub activity: Option<String>,
    pub app_rules: Vec<Arc<ResolvedRule>>,
    pub global_rules: Vec<Arc<ResolvedRule>>,
}

impl ActivityRule {
    fn build(app: Option<&str>, activity: Option<&str>, rules: &[Arc<ResolvedRule>]) -> Self {
        let (app_rules, global_rules): (Vec<_>, Vec<_>) = rules
            .iter()
            .filter(|r| r.applies_to(app, activity))
            .cloned()
            .partition(|r| r.id.app.is_some());
        Self {
            app: app.map(str::to_string),
            activity: activity.map(str::to_string),
            app_rules,
            global_rules,
        }
    }

    /// app rules first, then global ones, each in declared order
    pub fn rules(&self) -> impl Iterator<Item = &Arc<ResolvedRule>> {
        self.app_rules.iter().chain(&self.global_rules)
    }

    pub fn is_empty(&self) -> bool {
        self.app_rules.is_empty() && self.global_rules.is_empty()
    }

    pub fn contains(&self, id: &RuleId) -> bool {
        self.rules().any(|r| &r.id == id)
    }

    /// any rule could ever become priority
    pub fn has_priority_rule(&self) -> bool {
        self.rules().any(|r| r.timing.priority_time > 0)
    }

    /// some rule is priority right now
    pub fn active_priority(&self, now: i64, last: Option<&RuleId>) -> bool {
        self.has_priority_rule() && self.rules().any(|r| r.is_priority(now, last))
    }

    /// evaluation order: priority rules first, then declared order
    pub fn ordered(&self, now: i64, last: Option<&RuleId>) -> Vec<Arc<ResolvedRule>> {
        let mut ordered: Vec<Arc<ResolvedRule>> = self.rules().cloned().collect();
        if self.has_priority_rule() {
            ordered.sort_by_key(|r| !r.is_priority(now, last));
        }
        ordered
    }

    /// no rule could become Ok without a context change
    pub fn skip_match(&self, now: i64, last: Option<&RuleId>) -> bool {
        !self.rules().any(|r| r.status(now, last).is_alive())
    }

    /// tree events can be dropped before they reach the query lane
    pub fn skip_consume_event(&self, now: i64, last: Option<&RuleId>) -> bool {
        self.rules()
            .all(|r| r.status(now, last) == Status::MaxCountReached)
    }
}

/// what a foreground update changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextChange {
    AppChanged,
    ActivityChanged,
    Unchanged,
}

/// owns the active rule list and the current [`ActivityRule`]
#[derive(Debug, Default)]
pub struct RuleResolver {
    rules: Vec<Arc<ResolvedRule>>,
    current: Arc<ActivityRule>,
    last_triggered: Option<RuleId>,
}

impl RuleResolver {
    pub fn new(rules: Vec<Arc<ResolvedRule>>) -> Self {
        let current = Arc::new(ActivityRule::build(None, None, &rules));
        Self {
            rules,
            current,
            last_triggered: None,
        }
    }

    pub fn current(&self) -> Arc<ActivityRule> {
        self.current.clone()
    }

    pub fn rules(&self) -> &[Arc<ResolvedRule>] {
        &self.rules
    }

    pub fn last_triggered(&self) -> Option<&RuleId> {
        self.last_triggered.as_ref()
    }

    pub fn record_trigger(&mut self, id: &RuleId) {
        self.last_triggered = Some(id.clone());
    }

    /// replace the active rules (hot reload), keeping the foreground context
    pub fn set_rules(&mut self, rules: Vec<Arc<ResolvedRule>>) {
        info!(count = rules.len(), "rule set replaced");
        self.rules = rules;
        self.last_triggered = None;
        self.rebuild();
    }

    /// move to a new foreground context, resetting counters as configured
    pub fn update(&mut self, app: Option<&str>, activity: Option<&str>, now: i64) -> ContextChange {
        let previous = self.current.clone();
        let change = if previous.app.as_deref() != app {
            ContextChange::AppChanged
        } else if previous.activity.as_deref() != activity {
            ContextChange::ActivityChanged
        } else {
            ContextChange::Unchanged
        };

        match change {
            ContextChange::Unchanged => return change,
            ContextChange::AppChanged => {
                self.last_triggered = None;
                for rule in &self.rules {
                    rule.reset(now);
                }
            }
            ContextChange::ActivityChanged => {
                let next = ActivityRule::build(app, activity, &self.rules);
                for rule in next.rules() {
                    if rule.reset_match == ResetMatch::Activity {
                        rule.reset(now);
                    } else if !previous.contains(&rule.id) {
                        rule.begin_match(now);
                    }
                }
            }
        }

        self.current = Arc::new(ActivityRule::build(app, activity, &self.rules));
        debug!(
            app = app.unwrap_or("-"),
            activity = activity.unwrap_or("-"),
            change = ?change,
            rules = self.current.app_rules.len() + self.current.global_rules.len(),
            "foreground context updated"
        );
        change
    }

    fn rebuild(&mut self) {
        let current = self.current.clone();
        self.current = Arc::new(ActivityRule::build(
            current.app.as_deref(),
            current.activity.as_deref(),
            &self.rules,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EngineSettings, RuleConfig, RuleGroup, RuleSet};
    use crate::rules::load;

    fn rules(app_rules: Vec<RuleConfig>, global: Vec<RuleConfig>) -> Vec<Arc<ResolvedRule>> {
        let group = |key, app: Option<&str>, rules| RuleGroup {
            key,
            name: None,
            app: app.map(str::to_string),
            enable: true,
            activity_ids: vec![],
            exclude_activity_ids: vec![],
            apps: vec![],
            exclude_apps: vec![],
            rules,
        };
        let set = RuleSet {
            groups: vec![group(1, Some("app"), app_rules), group(2, None, global)],
        };
        let loaded = load(&set, &EngineSettings::default(), 0);
        assert!(loaded.is_clean(), "{:?}", loaded.errors);
        loaded.rules
    }

    fn rule(key: i64) -> RuleConfig {
        RuleConfig {
            key,
            matches: vec!["[text='OK']".into()],
            ..RuleConfig::default()
        }
    }

    #[test]
    fn test_snapshot_partitions_rules() {
        let mut resolver = RuleResolver::new(rules(vec![rule(0)], vec![rule(0)]));
        assert_eq!(resolver.update(Some("app"), None, 0), ContextChange::AppChanged);
        let current = resolver.current();
        assert_eq!(current.app_rules.len(), 1);
        assert_eq!(current.global_rules.len(), 1);

        resolver.update(Some("other"), None, 0);
        let current = resolver.current();
        assert!(current.app_rules.is_empty());
        assert_eq!(current.global_rules.len(), 1);
    }

    #[test]
    fn test_max_count_resets_on_app_change() {
        let mut resolver = RuleResolver::new(rules(
            vec![RuleConfig {
                action_maximum: Some(1),
                ..rule(0)
            }],
            vec![],
        ));
        resolver.update(Some("app"), Some("app.Main"), 0);
        let r = resolver.current().app_rules[0].clone();
        r.trigger(10);
        resolver.record_trigger(&r.id);
        assert_eq!(r.status(2000, resolver.last_triggered()), Status::MaxCountReached);

        // page change keeps the count for resetMatch=app only
        resolver.update(Some("app"), Some("app.Other"), 2000);
        assert_eq!(r.status(2000, None), Status::Ok);
        r.trigger(2100);
        resolver.update(Some("launcher"), None, 3000);
        resolver.update(Some("app"), Some("app.Main"), 4000);
        assert_eq!(r.status(4000, None), Status::Ok);
        assert_eq!(resolver.last_triggered(), None);
    }

    #[test]
    fn test_reset_match_app_survives_page_change() {
        let mut resolver = RuleResolver::new(rules(
            vec![RuleConfig {
                action_maximum: Some(1),
                reset_match: ResetMatch::App,
                ..rule(0)
            }],
            vec![],
        ));
        resolver.update(Some("app"), Some("app.Main"), 0);
        let r = resolver.current().app_rules[0].clone();
        r.trigger(10);
        resolver.update(Some("app"), Some("app.Other"), 100);
        assert_eq!(r.status(5000, None), Status::MaxCountReached);
    }

    #[test]
    fn test_priority_ordering() {
        let mut resolver = RuleResolver::new(rules(
            vec![
                rule(0),
                RuleConfig {
                    priority_time: 1000,
                    ..rule(1)
                },
            ],
            vec![],
        ));
        resolver.update(Some("app"), None, 0);
        let current = resolver.current();
        assert!(current.has_priority_rule());
        assert!(current.active_priority(10, None));
        let keys: Vec<i64> = current.ordered(10, None).iter().map(|r| r.id.key).collect();
        assert_eq!(keys, vec![1, 0]);
        let keys: Vec<i64> = current.ordered(5000, None).iter().map(|r| r.id.key).collect();
        assert_eq!(keys, vec![0, 1]);
    }

    #[test]
    fn test_skip_flags() {
        let mut resolver = RuleResolver::new(rules(
            vec![RuleConfig {
                action_maximum: Some(1),
                ..rule(0)
            }],
            vec![],
        ));
        resolver.update(Some("app"), None, 0);
        let current = resolver.current();
        assert!(!current.skip_match(0, None));
        assert!(!current.skip_consume_event(0, None));
        current.app_rules[0].trigger(0);
        assert!(current.skip_match(10, None));
        assert!(current.skip_consume_event(10, None));

        resolver.update(Some("nothing-here"), None, 20);
        assert!(resolver.current().is_empty());
        assert!(resolver.current().skip_consume_event(20, None));
    }

    #[test]
    fn test_newly_applicable_rule_starts_its_window() {
        let mut scoped = RuleConfig {
            match_delay: 500,
            reset_match: ResetMatch::App,
            ..rule(0)
        };
        scoped.activity_ids = Some(vec!["app.Detail".into()]);
        let mut resolver = RuleResolver::new(rules(vec![scoped], vec![]));
        resolver.update(Some("app"), Some("app.Main"), 0);
        assert!(resolver.current().is_empty());

        resolver.update(Some("app"), Some("app.Detail"), 1000);
        let r = resolver.current().app_rules[0].clone();
        assert_eq!(r.status(1000, None), Status::InMatchDelay);
        assert_eq!(r.status(1499, None), Status::InMatchDelay);
        assert_eq!(r.status(1500, None), Status::Ok);
    }
}
