//! compiled rule: selectors, timing config and runtime counters
//!
//! runtime state lives in atomics so a rule can be read from any lane, but
//! only the query lane writes it.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::action::Action;
use crate::config::schema::ResetMatch;
use crate::query::{Interrupt, Interrupted, MatchOptions, QueryEngine};
use crate::selector::Selector;
use crate::tree::TreeSource;

/// marks an unset timestamp
const UNSET: i64 = i64::MIN;

/// stable rule identity: owning app (none for global), group key, rule key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleId {
    pub app: Option<String>,
    pub group: i64,
    pub key: i64,
}

impl RuleId {
    pub fn new(app: Option<&str>, group: i64, key: i64) -> Self {
        Self {
            app: app.map(str::to_string),
            group,
            key,
        }
    }

    pub fn same_group(&self, other: &RuleId) -> bool {
        self.app == other.app && self.group == other.group
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.app.as_deref().unwrap_or("global"),
            self.group,
            self.key
        )
    }
}

/// eligibility, in evaluation priority order: the first that holds wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    MaxCountReached,
    NeedsPrerequisite,
    InMatchDelay,
    MatchWindowExpired,
    InCooldown,
    InActionDelay,
    Ok,
}

impl Status {
    /// could still become Ok with the passage of time
    pub fn is_alive(&self) -> bool {
        !matches!(
            self,
            Status::MaxCountReached | Status::NeedsPrerequisite | Status::MatchWindowExpired
        )
    }

    pub fn is_ok(&self) -> bool {
        *self == Status::Ok
    }

    pub fn name(&self) -> &'static str {
        match self {
            Status::MaxCountReached => "max-count-reached",
            Status::NeedsPrerequisite => "needs-prerequisite",
            Status::InMatchDelay => "in-match-delay",
            Status::MatchWindowExpired => "match-window-expired",
            Status::InCooldown => "in-cooldown",
            Status::InActionDelay => "in-action-delay",
            Status::Ok => "ok",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// timing configuration, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub match_delay: i64,
    pub action_delay: i64,
    pub action_cd: i64,
    pub action_maximum: Option<i64>,
    pub match_time: Option<i64>,
    pub priority_time: i64,
    pub priority_action_maximum: i64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            match_delay: 0,
            action_delay: 0,
            action_cd: 1000,
            action_maximum: None,
            match_time: None,
            priority_time: 0,
            priority_action_maximum: 1,
        }
    }
}

/// last trigger time, possibly shared through `actionCdKey`
#[derive(Debug)]
pub struct CooldownSlot {
    trigger_time: AtomicI64,
}

impl Default for CooldownSlot {
    fn default() -> Self {
        Self {
            trigger_time: AtomicI64::new(UNSET),
        }
    }
}

impl CooldownSlot {
    pub fn trigger_time(&self) -> Option<i64> {
        match self.trigger_time.load(Ordering::Acquire) {
            UNSET => None,
            t => Some(t),
        }
    }
}

/// action count, possibly shared through `actionMaximumKey`
#[derive(Debug, Default)]
pub struct CountSlot {
    count: AtomicI64,
}

impl CountSlot {
    pub fn get(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }
}

/// page filter of a rule
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub activity_ids: Vec<String>,
    pub exclude_activity_ids: Vec<String>,
    /// global rules only
    pub apps: Vec<String>,
    pub exclude_apps: Vec<String>,
}

impl Scope {
    fn activity_allowed(&self, activity: Option<&str>) -> bool {
        let prefixed = |ids: &[String], a: &str| ids.iter().any(|id| a.starts_with(id.as_str()));
        match activity {
            Some(a) => {
                (self.activity_ids.is_empty() || prefixed(&self.activity_ids, a))
                    && !prefixed(&self.exclude_activity_ids, a)
            }
            None => self.activity_ids.is_empty(),
        }
    }
}

/// an active rule, shared between lanes behind an `Arc`
#[derive(Debug)]
pub struct ResolvedRule {
    pub id: RuleId,
    pub name: Option<String>,
    pub matches: Vec<Selector>,
    pub exclude_matches: Vec<Selector>,
    pub any_matches: Vec<Selector>,
    pub timing: Timing,
    /// keys of same-group rules, one of which must have fired last
    pub pre_keys: Vec<i64>,
    pub reset_match: ResetMatch,
    pub match_root: bool,
    pub options: MatchOptions,
    pub action: Action,
    pub scope: Scope,

    cooldown: Arc<CooldownSlot>,
    count: Arc<CountSlot>,
    own_count: AtomicI64,
    match_changed_time: AtomicI64,
    action_delay_trigger: AtomicI64,
}

impl ResolvedRule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RuleId,
        name: Option<String>,
        matches: Vec<Selector>,
        exclude_matches: Vec<Selector>,
        any_matches: Vec<Selector>,
        timing: Timing,
        pre_keys: Vec<i64>,
        reset_match: ResetMatch,
        match_root: bool,
        options: MatchOptions,
        action: Action,
        scope: Scope,
        now: i64,
    ) -> Self {
        Self {
            id,
            name,
            matches,
            exclude_matches,
            any_matches,
            timing,
            pre_keys,
            reset_match,
            match_root,
            options,
            action,
            scope,
            cooldown: Arc::new(CooldownSlot::default()),
            count: Arc::new(CountSlot::default()),
            own_count: AtomicI64::new(0),
            match_changed_time: AtomicI64::new(now),
            action_delay_trigger: AtomicI64::new(UNSET),
        }
    }

    /// a bare rule with one selector, mostly for tests and the CLI
    pub fn simple(id: RuleId, selector: Selector, timing: Timing, now: i64) -> Self {
        Self::new(
            id,
            None,
            vec![selector],
            vec![],
            vec![],
            timing,
            vec![],
            ResetMatch::default(),
            false,
            MatchOptions::default(),
            Action::default(),
            Scope::default(),
            now,
        )
    }

    pub fn cooldown_slot(&self) -> Arc<CooldownSlot> {
        self.cooldown.clone()
    }

    pub fn count_slot(&self) -> Arc<CountSlot> {
        self.count.clone()
    }

    /// share another rule's cooldown (`actionCdKey`)
    pub fn with_cooldown_slot(mut self, slot: Arc<CooldownSlot>) -> Self {
        self.cooldown = slot;
        self
    }

    /// share another rule's action count (`actionMaximumKey`)
    pub fn with_count_slot(mut self, slot: Arc<CountSlot>) -> Self {
        self.count = slot;
        self
    }

    pub fn with_pre_keys(mut self, keys: Vec<i64>) -> Self {
        self.pre_keys = keys;
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_reset_match(mut self, reset_match: ResetMatch) -> Self {
        self.reset_match = reset_match;
        self
    }

    pub fn action_count(&self) -> i64 {
        self.count.get()
    }

    pub fn own_count(&self) -> i64 {
        self.own_count.load(Ordering::Acquire)
    }

    pub fn match_changed_time(&self) -> i64 {
        self.match_changed_time.load(Ordering::Acquire)
    }

    fn action_delay_armed_at(&self) -> Option<i64> {
        match self.action_delay_trigger.load(Ordering::Acquire) {
            UNSET => None,
            t => Some(t),
        }
    }

    /// does the rule run in this foreground context
    pub fn applies_to(&self, app: Option<&str>, activity: Option<&str>) -> bool {
        let app_ok = match (&self.id.app, app) {
            (Some(own), Some(app)) => own == app,
            (Some(_), None) => false,
            (None, Some(app)) => {
                (self.scope.apps.is_empty() || self.scope.apps.iter().any(|a| a == app))
                    && !self.scope.exclude_apps.iter().any(|a| a == app)
            }
            (None, None) => self.scope.apps.is_empty(),
        };
        app_ok && self.scope.activity_allowed(activity)
    }

    /// pure function of time, counters and the last triggered rule
    pub fn status(&self, now: i64, last_triggered: Option<&RuleId>) -> Status {
        let t = &self.timing;

        if let Some(max) = t.action_maximum {
            if self.count.get() >= max {
                return Status::MaxCountReached;
            }
        }

        if !self.pre_keys.is_empty() {
            let satisfied = last_triggered
                .is_some_and(|last| last.same_group(&self.id) && self.pre_keys.contains(&last.key));
            if !satisfied {
                return Status::NeedsPrerequisite;
            }
        }

        let since_change = now.saturating_sub(self.match_changed_time());
        if since_change < t.match_delay {
            return Status::InMatchDelay;
        }
        if let Some(window) = t.match_time {
            if since_change > window.saturating_add(t.match_delay) {
                return Status::MatchWindowExpired;
            }
        }

        if let Some(triggered) = self.cooldown.trigger_time() {
            if now.saturating_sub(triggered) < t.action_cd {
                return Status::InCooldown;
            }
        }

        if let Some(armed) = self.action_delay_armed_at() {
            if now.saturating_sub(armed) < t.action_delay {
                return Status::InActionDelay;
            }
        }

        Status::Ok
    }

    /// may jump the queue and is exempt from interruption
    pub fn is_priority(&self, now: i64, last_triggered: Option<&RuleId>) -> bool {
        let t = &self.timing;
        t.priority_time > 0
            && self.own_count() < t.priority_action_maximum
            && now
                < self
                    .match_changed_time()
                    .saturating_add(t.match_delay)
                    .saturating_add(t.priority_time)
            && self.status(now, last_triggered).is_ok()
    }

    pub fn trigger(&self, now: i64) {
        self.cooldown.trigger_time.store(now, Ordering::Release);
        self.count.count.fetch_add(1, Ordering::AcqRel);
        self.own_count.fetch_add(1, Ordering::AcqRel);
        self.action_delay_trigger.store(UNSET, Ordering::Release);
    }

    /// start a new applicability window and zero the counters
    pub fn reset(&self, now: i64) {
        self.match_changed_time.store(now, Ordering::Release);
        self.count.count.store(0, Ordering::Release);
        self.own_count.store(0, Ordering::Release);
        self.action_delay_trigger.store(UNSET, Ordering::Release);
    }

    /// the rule just became applicable; counters are left alone
    pub fn begin_match(&self, now: i64) {
        self.match_changed_time.store(now, Ordering::Release);
    }

    /// arm the action delay; returns false if it was already armed
    pub fn arm_action_delay(&self, now: i64) -> bool {
        self.action_delay_trigger
            .compare_exchange(UNSET, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn has_action_delay(&self) -> bool {
        self.timing.action_delay > 0
    }

    pub fn action_delay_remaining(&self, now: i64) -> Option<i64> {
        let armed = self.action_delay_armed_at()?;
        Some(armed.saturating_add(self.timing.action_delay).saturating_sub(now).max(0))
    }

    pub fn match_delay_remaining(&self, now: i64) -> i64 {
        self.match_changed_time()
            .saturating_add(self.timing.match_delay)
            .saturating_sub(now)
            .max(0)
    }

    /// every selector a rule consults, for diagnostics
    pub fn selectors(&self) -> impl Iterator<Item = &Selector> {
        self.matches
            .iter()
            .chain(&self.any_matches)
            .chain(&self.exclude_matches)
    }

    /// run the rule's selectors; returns the action target
    ///
    /// every `matches` selector must hit (the last one supplies the target),
    /// at least one `anyMatches` selector must hit when there are any (it
    /// supplies the target when `matches` is empty), and no
    /// `excludeMatches` selector may hit.
    pub fn query<'a, T: TreeSource>(
        &self,
        engine: &QueryEngine<'a, T>,
        start: Option<&T::Node>,
        interrupt: Interrupt<'a>,
        now: i64,
    ) -> Result<Option<T::Node>, Interrupted> {
        let start = if self.match_root { None } else { start };
        let mut target = None;

        for selector in &self.matches {
            match engine.query(selector, start, self.options, interrupt, now)? {
                Some(node) => target = Some(node),
                None => return Ok(None),
            }
        }

        if !self.any_matches.is_empty() {
            let mut any = None;
            for selector in &self.any_matches {
                if let Some(node) = engine.query(selector, start, self.options, interrupt, now)? {
                    any = Some(node);
                    break;
                }
            }
            let Some(node) = any else {
                return Ok(None);
            };
            if target.is_none() {
                target = Some(node);
            }
        }

        for selector in &self.exclude_matches {
            if engine
                .query(selector, start, self.options, interrupt, now)?
                .is_some()
            {
                return Ok(None);
            }
        }

        Ok(target)
    }
}
