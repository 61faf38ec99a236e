// node cache behavior under a changing tree

use axsel::query::{Interrupt, Limits, MatchOptions, QueryEngine};
use axsel::selector::compile;
use axsel::tree::cache::{CacheConfig, NodeCache};
use axsel::tree::fixture::{FixtureNode, FixtureTree};

use crate::common::dialog;

fn run(
    tree: &FixtureTree,
    cache: &NodeCache<FixtureNode>,
    src: &str,
    now: i64,
) -> Option<String> {
    let sel = compile(src).unwrap();
    let engine = QueryEngine::new(tree, Some(cache), Limits::default());
    engine
        .query(&sel, None, MatchOptions::default(), Interrupt::none(), now)
        .unwrap()
        .map(|n| tree.describe(&n))
}

#[test]
fn test_repeat_query_hits_cache() {
    let tree = dialog();
    let cache = NodeCache::new(CacheConfig::default());
    let src = "[vid='bar'] > Button[text='OK'] + Button";

    let first = run(&tree, &cache, src, 100);
    let misses = cache.stats().misses;
    let second = run(&tree, &cache, src, 150);

    assert_eq!(first, second);
    assert_eq!(first.as_deref(), Some("Button#confirm \"Confirm\""));
    assert!(cache.stats().hits > 0);
    assert!(misses > 0);
}

#[test]
fn test_node_changed_invalidates_subtree() {
    let tree = dialog();
    let cache = NodeCache::new(CacheConfig::default());
    let src = "[vid='list'] >1 FrameLayout > TextView";

    assert_eq!(run(&tree, &cache, src, 100).as_deref(), Some("TextView \"one\""));

    let list = tree.node_by_id("list").unwrap();
    tree.remove_child(&list, 0).unwrap();
    cache.node_changed(&list);

    assert_eq!(run(&tree, &cache, src, 110).as_deref(), Some("TextView \"two\""));
}

#[test]
fn test_clear_resets_entries() {
    let tree = dialog();
    let cache = NodeCache::new(CacheConfig::default());
    run(&tree, &cache, "ListView > FrameLayout > [text='three']", 0);
    assert!(cache.stats().entries > 0);

    cache.clear();
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_entries_expire_after_ttl() {
    let tree = dialog();
    let config = CacheConfig {
        ttl_text_ms: 10,
        ttl_plain_ms: 10,
        ..CacheConfig::default()
    };
    let cache = NodeCache::new(config);
    let src = "[vid='list'] >3 FrameLayout > TextView";
    assert_eq!(run(&tree, &cache, src, 0).as_deref(), Some("TextView \"three\""));

    // swapped behind the cache's back; only expiry can reveal it
    let list = tree.node_by_id("list").unwrap();
    tree.swap_children(&list, 0, 2).unwrap();

    assert_eq!(run(&tree, &cache, src, 1000).as_deref(), Some("TextView \"one\""));
}
