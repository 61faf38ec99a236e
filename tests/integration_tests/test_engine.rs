// query engine against the dialog fixture

use axsel::query::{Interrupt, Limits, MatchOptions, QueryEngine};
use axsel::selector::compile;
use axsel::tree::fixture::{FixtureNode, FixtureTree};
use axsel::tree::TreeSource;

use crate::common::dialog;

fn run(tree: &FixtureTree, src: &str, options: MatchOptions) -> Option<FixtureNode> {
    let sel = compile(src).unwrap();
    let engine = QueryEngine::new(tree, None, Limits::default());
    engine
        .query(&sel, None, options, Interrupt::none(), 0)
        .unwrap()
}

fn find(tree: &FixtureTree, src: &str) -> Option<String> {
    run(tree, src, MatchOptions::default()).map(|n| tree.describe(&n))
}

#[test]
fn test_ok_then_confirm() {
    let tree = dialog();
    assert_eq!(
        find(&tree, "Button[text=`OK`] + [vid=`confirm`]").as_deref(),
        Some("Button#confirm \"Confirm\"")
    );
    // Confirm is two siblings after Cancel
    assert!(find(&tree, "Button[text=`Cancel`] + [vid=`confirm`]").is_some());
    assert_eq!(find(&tree, "Button[text=`Cancel`] +1 [vid=`confirm`]"), None);
    assert!(find(&tree, "Button[text=`Cancel`] +2 [vid=`confirm`]").is_some());
}

#[test]
fn test_list_item_by_offset() {
    let tree = dialog();
    assert_eq!(
        find(&tree, "[vid='list'] >2 FrameLayout > TextView").as_deref(),
        Some("TextView \"two\"")
    );
    assert_eq!(find(&tree, "[vid='list'] >4 FrameLayout"), None);
}

#[test]
fn test_target_marker_picks_ancestor_segment() {
    let tree = dialog();
    let found = run(
        &tree,
        "$FrameLayout > TextView[text='three']",
        MatchOptions::default(),
    )
    .unwrap();
    let list = tree.node_by_id("app:id/list").unwrap();
    assert_eq!(tree.parent(&found).unwrap(), Some(list));
}

#[test]
fn test_root_anchor() {
    let tree = dialog();
    assert!(find(&tree, "@[vid='root'] > LinearLayout > Button[text='OK']").is_some());
    assert_eq!(find(&tree, "@LinearLayout > Button"), None);
}

#[test]
fn test_index_modes_agree_with_traversal() {
    let tree = dialog();
    let quick = MatchOptions {
        quick_find: true,
        fast_query: false,
    };
    let fast = MatchOptions {
        quick_find: false,
        fast_query: true,
    };
    for src in [
        "Button[text=`OK`] + [vid=`confirm`]",
        "[vid='bar'] > Button[text='Cancel']",
        "[text='two'] < FrameLayout",
        "ListView > FrameLayout > [text='three']",
    ] {
        let plain = run(&tree, src, MatchOptions::default());
        assert!(plain.is_some(), "{}", src);
        assert_eq!(run(&tree, src, quick), plain, "quick_find {}", src);
        assert_eq!(run(&tree, src, fast), plain, "fast_query {}", src);
    }
}

#[test]
fn test_query_is_idempotent() {
    let tree = dialog();
    let src = "ListView >> TextView[text.length = 3]";
    let first = find(&tree, src);
    assert_eq!(first.as_deref(), Some("TextView \"one\""));
    for _ in 0..3 {
        assert_eq!(find(&tree, src), first);
    }
}

#[test]
fn test_sees_tree_mutation_without_cache() {
    let tree = dialog();
    let two = tree.node_by_text("two").unwrap();
    tree.set_text(&two, Some("zwei")).unwrap();

    assert_eq!(find(&tree, "[text='two']"), None);
    assert_eq!(find(&tree, "[text='zwei']").as_deref(), Some("TextView \"zwei\""));
}

#[test]
fn test_descendant_limit_bounds_search() {
    let tree = dialog();
    let sel = compile("[vid='root'] >> [text='Confirm']").unwrap();
    let limits = Limits {
        max_children: 512,
        max_descendants: 3,
    };
    let engine = QueryEngine::new(&tree, None, limits);
    let found = engine
        .query(&sel, None, MatchOptions::default(), Interrupt::none(), 0)
        .unwrap();
    assert_eq!(found, None);
}
