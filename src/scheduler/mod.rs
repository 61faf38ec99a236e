//! matching scheduler: the event, query and action lanes
//!
//! * the event lane (a tokio task) drains raw notifications, drops bursts no
//!   rule could use, coalesces the rest and bumps the interrupt counter so
//!   any in-flight evaluation yields to the newer batch.
//! * the query lane (a dedicated thread) owns the rule resolver and is the
//!   only place that reads the tree for matching.
//! * the action lane (a tokio task) performs actions one at a time and runs
//!   the delay and follow-up timers, which post work back to the query lane.
//!
//! rule counters are only written by the query lane, which waits for each
//! action's outcome before moving on.

pub mod events;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::action::{Action, ActionError, ActionExecutor};
use crate::clock::{Clock, SystemClock};
use crate::config::schema::{EngineSettings, RuleSet};
use crate::query::{Interrupt, Interrupted, QueryEngine};
use crate::rules::{self, ContextChange, ResolvedRule, RuleId, RuleResolver, Status};
use crate::tree::cache::{CacheStats, NodeCache};
use crate::tree::TreeSource;

pub use events::{coalesce, Batch, EventKind, TreeEvent};

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    batches: AtomicU64,
    skipped_batches: AtomicU64,
    superseded_batches: AtomicU64,
    evaluations: AtomicU64,
    interrupted: AtomicU64,
    actions: AtomicU64,
    failed_actions: AtomicU64,
}

/// state read across lanes; each field has a single writer
#[derive(Debug, Default)]
struct Shared {
    /// bumped by the event lane for every batch it forwards
    interrupt: AtomicU64,
    /// written by the query lane: no rule in the current context can fire
    skip_consume: AtomicBool,
    foreground_app: RwLock<Option<String>>,
    counters: Counters,
}

impl Shared {
    fn bump(&self) {
        self.interrupt.fetch_add(1, Ordering::AcqRel);
    }

    /// a burst of content changes in an app where nothing can fire
    fn can_skip<N>(&self, burst: &[TreeEvent<N>]) -> bool {
        if !self.skip_consume.load(Ordering::Acquire) {
            return false;
        }
        let app = self
            .foreground_app
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        burst
            .iter()
            .all(|e| e.kind == EventKind::ContentChanged && e.app == app)
    }
}

/// snapshot of the scheduler's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub batches: u64,
    pub skipped_batches: u64,
    /// queued behind a newer batch; cache invalidation only
    pub superseded_batches: u64,
    pub evaluations: u64,
    pub interrupted: u64,
    pub actions: u64,
    pub failed_actions: u64,
    pub cache: CacheStats,
}

// ============================================================================
// Lane Messages
// ============================================================================

#[derive(Debug)]
enum QueryCommand<N> {
    Batch(Batch<N>),
    /// timer fired: re-evaluate one rule, or every rule for a follow-up pass
    Rerun(Option<RuleId>),
    Foreground {
        app: Option<String>,
        activity: Option<String>,
    },
    SetRules(RuleSet),
    Shutdown,
}

#[derive(Debug)]
enum ActionCommand<N> {
    Perform {
        node: N,
        action: Action,
        reply: oneshot::Sender<Result<(), ActionError>>,
    },
    Schedule {
        after: Duration,
        command: QueryCommand<N>,
    },
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler<T: TreeSource> {
    tree: Arc<T>,
    executor: Arc<dyn ActionExecutor<T::Node>>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    rules: RuleSet,
}

impl<T: TreeSource> Scheduler<T> {
    pub fn new(tree: Arc<T>, executor: Arc<dyn ActionExecutor<T::Node>>) -> Self {
        Self {
            tree,
            executor,
            clock: Arc::new(SystemClock),
            settings: EngineSettings::default(),
            rules: RuleSet::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// spawn the three lanes; must be called inside a tokio runtime
    pub fn start(self) -> Result<SchedulerHandle<T::Node>> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (query_tx, query_rx) = mpsc::unbounded_channel();
        let (action_tx, action_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared::default());
        let cache = Arc::new(NodeCache::new(self.settings.cache_config()));

        let loaded = rules::load(&self.rules, &self.settings, self.clock.now_ms());
        let (active, rejected) = (loaded.rules.len(), loaded.errors.len());
        let lane = QueryLane {
            tree: self.tree,
            cache: cache.clone(),
            clock: self.clock,
            resolver: RuleResolver::new(loaded.rules),
            settings: self.settings.clone(),
            shared: shared.clone(),
            actions: action_tx,
            pending: HashSet::new(),
        };
        let query_lane = thread::Builder::new()
            .name("axsel-query".to_string())
            .spawn(move || lane.run(query_rx))
            .context("failed to spawn query lane")?;

        tokio::spawn(event_lane(
            event_rx,
            query_tx.clone(),
            shared.clone(),
            self.settings.reuse_event_nodes,
        ));
        tokio::spawn(action_lane(action_rx, self.executor, query_tx.clone()));

        info!(active, rejected, "scheduler started");

        Ok(SchedulerHandle {
            events: event_tx,
            query: query_tx,
            shared,
            cache,
            query_lane: Some(query_lane),
        })
    }
}

/// control surface of a running scheduler
pub struct SchedulerHandle<N> {
    events: mpsc::UnboundedSender<TreeEvent<N>>,
    query: mpsc::UnboundedSender<QueryCommand<N>>,
    shared: Arc<Shared>,
    cache: Arc<NodeCache<N>>,
    query_lane: Option<JoinHandle<()>>,
}

impl<N> SchedulerHandle<N>
where
    N: Clone + Eq + std::hash::Hash + std::fmt::Debug + Send + 'static,
{
    /// queue a tree notification; false once the scheduler is gone
    pub fn send(&self, event: TreeEvent<N>) -> bool {
        self.events.send(event).is_ok()
    }

    /// hot reload; counters start over
    pub fn set_rules(&self, rules: RuleSet) -> bool {
        self.query.send(QueryCommand::SetRules(rules)).is_ok()
    }

    /// report a foreground change directly; supersedes in-flight work
    pub fn foreground(&self, app: &str, activity: Option<&str>) -> bool {
        self.shared.bump();
        self.query
            .send(QueryCommand::Foreground {
                app: Some(app.to_string()),
                activity: activity.map(str::to_string),
            })
            .is_ok()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.shared.counters;
        SchedulerStats {
            batches: c.batches.load(Ordering::Relaxed),
            skipped_batches: c.skipped_batches.load(Ordering::Relaxed),
            superseded_batches: c.superseded_batches.load(Ordering::Relaxed),
            evaluations: c.evaluations.load(Ordering::Relaxed),
            interrupted: c.interrupted.load(Ordering::Relaxed),
            actions: c.actions.load(Ordering::Relaxed),
            failed_actions: c.failed_actions.load(Ordering::Relaxed),
            cache: self.cache.stats(),
        }
    }

    /// stop the query lane and wait for it; the other lanes wind down with it
    pub async fn shutdown(mut self) {
        let _ = self.query.send(QueryCommand::Shutdown);
        if let Some(lane) = self.query_lane.take() {
            match tokio::task::spawn_blocking(move || lane.join()).await {
                Ok(Ok(())) => {}
                _ => warn!("query lane did not shut down cleanly"),
            }
        }
        info!("scheduler stopped");
    }
}

impl<N> Drop for SchedulerHandle<N> {
    fn drop(&mut self) {
        let _ = self.query.send(QueryCommand::Shutdown);
    }
}

// ============================================================================
// Event Lane
// ============================================================================

async fn event_lane<N: Clone + PartialEq>(
    mut events: mpsc::UnboundedReceiver<TreeEvent<N>>,
    query: mpsc::UnboundedSender<QueryCommand<N>>,
    shared: Arc<Shared>,
    reuse: usize,
) {
    while let Some(first) = events.recv().await {
        let mut burst = vec![first];
        while let Ok(event) = events.try_recv() {
            burst.push(event);
        }

        if shared.can_skip(&burst) {
            shared
                .counters
                .skipped_batches
                .fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let Some(batch) = coalesce(burst, reuse) else {
            continue;
        };
        shared.bump();
        if query.send(QueryCommand::Batch(batch)).is_err() {
            break;
        }
    }
    debug!("event lane finished");
}

// ============================================================================
// Action Lane
// ============================================================================

async fn action_lane<N: Send + 'static>(
    mut commands: mpsc::UnboundedReceiver<ActionCommand<N>>,
    executor: Arc<dyn ActionExecutor<N>>,
    query: mpsc::UnboundedSender<QueryCommand<N>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            ActionCommand::Perform {
                node,
                action,
                reply,
            } => {
                let result = executor.perform(&node, &action);
                let _ = reply.send(result);
            }
            ActionCommand::Schedule { after, command } => {
                let query = query.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = query.send(command);
                });
            }
        }
    }
    debug!("action lane finished");
}

// ============================================================================
// Query Lane
// ============================================================================

struct QueryLane<T: TreeSource> {
    tree: Arc<T>,
    cache: Arc<NodeCache<T::Node>>,
    clock: Arc<dyn Clock>,
    resolver: RuleResolver,
    settings: EngineSettings,
    shared: Arc<Shared>,
    actions: mpsc::UnboundedSender<ActionCommand<T::Node>>,
    /// rules with a delay timer in flight
    pending: HashSet<RuleId>,
}

impl<T: TreeSource> QueryLane<T> {
    fn run(mut self, mut commands: mpsc::UnboundedReceiver<QueryCommand<T::Node>>) {
        let mut held = None;
        loop {
            let command = match held.take() {
                Some(command) => command,
                None => match commands.blocking_recv() {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                QueryCommand::Shutdown => break,
                QueryCommand::Batch(batch) => {
                    let (batch, superseded, next) =
                        newest_batch(batch, || commands.try_recv().ok());
                    for old in &superseded {
                        self.on_superseded(old);
                    }
                    held = next;
                    self.on_batch(batch);
                }
                QueryCommand::Rerun(rule) => self.on_rerun(rule),
                QueryCommand::Foreground { app, activity } => {
                    self.on_foreground(app.as_deref(), activity.as_deref());
                }
                QueryCommand::SetRules(set) => self.on_set_rules(&set),
            }
            self.publish();
        }
        debug!("query lane finished");
    }

    fn publish(&self) {
        let now = self.clock.now_ms();
        let current = self.resolver.current();
        let skip = current.skip_consume_event(now, self.resolver.last_triggered());
        self.shared.skip_consume.store(skip, Ordering::Release);
        let mut app = self
            .shared
            .foreground_app
            .write()
            .unwrap_or_else(|e| e.into_inner());
        app.clone_from(&current.app);
    }

    fn on_foreground(&mut self, app: Option<&str>, activity: Option<&str>) {
        let now = self.clock.now_ms();
        if self.resolver.update(app, activity, now) == ContextChange::AppChanged {
            self.cache.clear();
            self.pending.clear();
            info!(app = app.unwrap_or("-"), "foreground app changed");
        }
    }

    fn on_set_rules(&mut self, set: &RuleSet) {
        let loaded = rules::load(set, &self.settings, self.clock.now_ms());
        self.resolver.set_rules(loaded.rules);
        self.pending.clear();
    }

    /// foreground and cache effects of a batch, without evaluating rules
    fn absorb(&mut self, batch: &Batch<T::Node>) {
        let current = self.resolver.current();
        let activity = if batch.app == current.app {
            batch.activity.clone().or_else(|| current.activity.clone())
        } else {
            batch.activity.clone()
        };
        self.on_foreground(batch.app.as_deref(), activity.as_deref());

        for node in &batch.changed {
            self.cache.node_changed(node);
        }
    }

    fn on_superseded(&mut self, batch: &Batch<T::Node>) {
        self.shared
            .counters
            .superseded_batches
            .fetch_add(1, Ordering::Relaxed);
        self.absorb(batch);
    }

    fn on_batch(&mut self, batch: Batch<T::Node>) {
        self.shared.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.absorb(&batch);

        let starts: Vec<T::Node> = batch
            .starts
            .iter()
            .filter_map(|node| match self.tree.refresh(node) {
                Ok(node) => node,
                Err(err) => {
                    debug!(error = %err, "dropping stale event node");
                    None
                }
            })
            .collect();

        debug!(
            events = batch.events,
            starts = starts.len(),
            "evaluating batch"
        );
        self.evaluate(&starts, None);
    }

    fn on_rerun(&mut self, rule: Option<RuleId>) {
        if let Some(id) = &rule {
            self.pending.remove(id);
        }
        self.evaluate(&[], rule.as_ref());
    }

    /// one pass over the current rules; stops after the first action
    fn evaluate(&mut self, starts: &[T::Node], only: Option<&RuleId>) {
        let now = self.clock.now_ms();
        let activity = self.resolver.current();
        let last = self.resolver.last_triggered().cloned();

        if activity.skip_match(now, last.as_ref()) {
            debug!("no rule can become ok, skipping evaluation");
            return;
        }

        let tree = self.tree.clone();
        let cache = self.cache.clone();
        let shared = self.shared.clone();
        let engine = QueryEngine::new(&*tree, Some(&*cache), self.settings.limits());

        for rule in activity.ordered(now, last.as_ref()) {
            if only.is_some_and(|id| id != &rule.id) {
                continue;
            }

            match rule.status(now, last.as_ref()) {
                Status::Ok => {}
                Status::InMatchDelay => {
                    self.schedule_rerun(&rule, rule.match_delay_remaining(now));
                    continue;
                }
                _ => continue,
            }

            let privileged = rule.is_priority(now, last.as_ref());
            let interrupt = Interrupt::new(&shared.interrupt, privileged);
            shared.counters.evaluations.fetch_add(1, Ordering::Relaxed);

            let target = match find_target(&engine, &rule, starts, interrupt, now) {
                Ok(target) => target,
                Err(Interrupted) => {
                    shared.counters.interrupted.fetch_add(1, Ordering::Relaxed);
                    debug!(rule = %rule.id, "evaluation superseded by a newer batch");
                    return;
                }
            };
            let Some(node) = target else {
                continue;
            };

            if rule.has_action_delay() && rule.action_delay_remaining(now).is_none() {
                rule.arm_action_delay(now);
                debug!(rule = %rule.id, delay = rule.timing.action_delay, "action delay armed");
                self.schedule_rerun(&rule, rule.timing.action_delay);
                continue;
            }

            if self.perform(&rule, node, now) {
                return;
            }
        }
    }

    /// hand the action to the action lane and wait for its outcome
    fn perform(&mut self, rule: &Arc<ResolvedRule>, node: T::Node, now: i64) -> bool {
        let outcome = if rule.action == Action::None {
            Ok(())
        } else {
            let (reply, outcome) = oneshot::channel();
            let command = ActionCommand::Perform {
                node,
                action: rule.action.clone(),
                reply,
            };
            if self.actions.send(command).is_err() {
                warn!(rule = %rule.id, "action lane is gone");
                return false;
            }
            match outcome.blocking_recv() {
                Ok(result) => result,
                Err(_) => {
                    warn!(rule = %rule.id, "action lane dropped the reply");
                    return false;
                }
            }
        };

        match outcome {
            Ok(()) => {
                rule.trigger(now);
                self.resolver.record_trigger(&rule.id);
                self.shared.counters.actions.fetch_add(1, Ordering::Relaxed);
                info!(rule = %rule.id, action = %rule.action, "action performed");
                self.schedule(
                    Duration::from_millis(self.settings.follow_up_delay_ms),
                    QueryCommand::Rerun(None),
                );
                true
            }
            Err(err) => {
                self.shared
                    .counters
                    .failed_actions
                    .fetch_add(1, Ordering::Relaxed);
                warn!(rule = %rule.id, error = %err, "action failed");
                false
            }
        }
    }

    fn schedule_rerun(&mut self, rule: &ResolvedRule, after_ms: i64) {
        if !self.pending.insert(rule.id.clone()) {
            return;
        }
        debug!(rule = %rule.id, after_ms, "rerun scheduled");
        let after = Duration::from_millis(u64::try_from(after_ms).unwrap_or(0));
        self.schedule(after, QueryCommand::Rerun(Some(rule.id.clone())));
    }

    fn schedule(&self, after: Duration, command: QueryCommand<T::Node>) {
        if self
            .actions
            .send(ActionCommand::Schedule { after, command })
            .is_err()
        {
            warn!("action lane is gone, timer dropped");
        }
    }
}

/// skip ahead to the newest of the batches queued back to back
///
/// returns the batch to evaluate, the older ones it replaces (oldest first)
/// and the first non-batch command pulled off the queue, if any
fn newest_batch<N>(
    first: Batch<N>,
    mut next: impl FnMut() -> Option<QueryCommand<N>>,
) -> (Batch<N>, Vec<Batch<N>>, Option<QueryCommand<N>>) {
    let mut newest = first;
    let mut superseded = Vec::new();
    while let Some(command) = next() {
        match command {
            QueryCommand::Batch(batch) => superseded.push(std::mem::replace(&mut newest, batch)),
            other => return (newest, superseded, Some(other)),
        }
    }
    (newest, superseded, None)
}

/// try the event nodes first, then the whole tree
fn find_target<'a, T: TreeSource>(
    engine: &QueryEngine<'a, T>,
    rule: &ResolvedRule,
    starts: &[T::Node],
    interrupt: Interrupt<'a>,
    now: i64,
) -> Result<Option<T::Node>, Interrupted> {
    for start in starts {
        if let Some(node) = rule.query(engine, Some(start), interrupt, now)? {
            return Ok(Some(node));
        }
    }
    rule.query(engine, None, interrupt, now)
}
