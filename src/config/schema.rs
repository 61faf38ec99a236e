use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::query::Limits;
use crate::tree::cache::CacheConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub rules: RuleSet,
}

pub const DEFAULT_CACHE_TTL_TEXT_MS: i64 = 1000;
pub const DEFAULT_CACHE_TTL_PLAIN_MS: i64 = 3000;
pub const DEFAULT_NODE_STALE_MS: i64 = 5000;
pub const DEFAULT_MAX_CHILDREN: usize = 512;
pub const DEFAULT_MAX_DESCENDANTS: usize = 5000;
pub const DEFAULT_FOLLOW_UP_DELAY_MS: u64 = 300;
pub const DEFAULT_REUSE_EVENT_NODES: usize = 2;
pub const DEFAULT_ACTION_CD_MS: i64 = 1000;

/// engine tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// cache TTL for nodes that carry text
    #[serde(default = "default_cache_ttl_text_ms")]
    pub cache_ttl_text_ms: i64,
    /// cache TTL for nodes without text (or not yet read)
    #[serde(default = "default_cache_ttl_plain_ms")]
    pub cache_ttl_plain_ms: i64,
    /// node handles older than this are refreshed before structural reads
    #[serde(default = "default_node_stale_ms")]
    pub node_stale_ms: i64,
    #[serde(default = "default_max_children")]
    pub max_children: usize,
    #[serde(default = "default_max_descendants")]
    pub max_descendants: usize,
    /// delay of the re-evaluation pass after a successful action
    #[serde(default = "default_follow_up_delay_ms")]
    pub follow_up_delay_ms: u64,
    /// how many of the latest event nodes a homogeneous batch reuses
    #[serde(default = "default_reuse_event_nodes")]
    pub reuse_event_nodes: usize,
    /// default for rules that don't set `quickFind`
    #[serde(default)]
    pub quick_find: bool,
    /// default for rules that don't set `fastQuery`
    #[serde(default)]
    pub fast_query: bool,
}

fn default_cache_ttl_text_ms() -> i64 {
    DEFAULT_CACHE_TTL_TEXT_MS
}

fn default_cache_ttl_plain_ms() -> i64 {
    DEFAULT_CACHE_TTL_PLAIN_MS
}

fn default_node_stale_ms() -> i64 {
    DEFAULT_NODE_STALE_MS
}

fn default_max_children() -> usize {
    DEFAULT_MAX_CHILDREN
}

fn default_max_descendants() -> usize {
    DEFAULT_MAX_DESCENDANTS
}

fn default_follow_up_delay_ms() -> u64 {
    DEFAULT_FOLLOW_UP_DELAY_MS
}

fn default_reuse_event_nodes() -> usize {
    DEFAULT_REUSE_EVENT_NODES
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl_text_ms: DEFAULT_CACHE_TTL_TEXT_MS,
            cache_ttl_plain_ms: DEFAULT_CACHE_TTL_PLAIN_MS,
            node_stale_ms: DEFAULT_NODE_STALE_MS,
            max_children: DEFAULT_MAX_CHILDREN,
            max_descendants: DEFAULT_MAX_DESCENDANTS,
            follow_up_delay_ms: DEFAULT_FOLLOW_UP_DELAY_MS,
            reuse_event_nodes: DEFAULT_REUSE_EVENT_NODES,
            quick_find: false,
            fast_query: false,
        }
    }
}

impl EngineSettings {
    pub fn limits(&self) -> Limits {
        Limits {
            max_children: self.max_children,
            max_descendants: self.max_descendants,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl_text_ms: self.cache_ttl_text_ms,
            ttl_plain_ms: self.cache_ttl_plain_ms,
            stale_ms: self.node_stale_ms,
            ..CacheConfig::default()
        }
    }
}

/// the full set of rule groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

/// rules sharing an app scope; key-based links (preKeys, shared slots)
/// resolve within one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    pub key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// owning app; `None` makes the group global
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default = "default_true")]
    pub enable: bool,
    /// page prefixes the rules apply to; empty means every page
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_activity_ids: Vec<String>,
    /// global groups only: restrict to these apps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<String>,
    /// global groups only: never run in these apps
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_apps: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_true() -> bool {
    true
}

/// counter scope: when a rule's counters reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMatch {
    /// only when the foreground app changes
    App,
    /// also when the foreground page changes
    #[default]
    Activity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(default)]
    pub key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any_matches: Vec<String>,
    #[serde(default)]
    pub match_delay: i64,
    #[serde(default)]
    pub action_delay: i64,
    #[serde(default = "default_action_cd")]
    pub action_cd: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_maximum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_time: Option<i64>,
    #[serde(default)]
    pub priority_time: i64,
    #[serde(default = "default_priority_action_maximum")]
    pub priority_action_maximum: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_keys: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_cd_key: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_maximum_key: Option<i64>,
    #[serde(default)]
    pub reset_match: ResetMatch,
    /// always match from the tree root instead of the event node
    #[serde(default)]
    pub match_root: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_find: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_query: Option<bool>,
    /// overrides the group's page filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_activity_ids: Option<Vec<String>>,
    #[serde(default)]
    pub action: Action,
}

fn default_action_cd() -> i64 {
    DEFAULT_ACTION_CD_MS
}

fn default_priority_action_maximum() -> i64 {
    1
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            key: 0,
            name: None,
            matches: vec![],
            exclude_matches: vec![],
            any_matches: vec![],
            match_delay: 0,
            action_delay: 0,
            action_cd: DEFAULT_ACTION_CD_MS,
            action_maximum: None,
            match_time: None,
            priority_time: 0,
            priority_action_maximum: 1,
            pre_keys: vec![],
            action_cd_key: None,
            action_maximum_key: None,
            reset_match: ResetMatch::default(),
            match_root: false,
            quick_find: None,
            fast_query: None,
            activity_ids: None,
            exclude_activity_ids: None,
            action: Action::default(),
        }
    }
}
