//! backtracking matcher
//!
//! forward matching walks the segments left to right: each combinator
//! enumerates candidates relative to the previous match, in document order
//! (relational walks nearest first), and the first candidate for which the
//! rest of the chain also matches wins.
//!
//! the fast-query path starts from indexed candidates for the last eligible
//! segment, verifies the segments before it by walking the combinators
//! backwards, then finishes forward.

use std::collections::HashSet;

use super::eval::{accepts, MatchContext};
use super::reader::Reader;
use super::{Interrupted, MatchOptions};
use crate::selector::{Combinator, CombinatorKind, FastKey, IndexPredicate, Selector};
use crate::tree::TreeSource;

/// what a visitor wants the walk to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// stop walking, nothing found
    Stop,
    /// stop walking, the chain matched
    Found,
}

type Visit<'v, N> = &'v mut dyn FnMut(&N) -> Result<Flow, Interrupted>;

pub(super) struct Matcher<'r, 'a, T: TreeSource> {
    reader: &'r Reader<'a, T>,
    selector: &'r Selector,
}

impl<'r, 'a, T: TreeSource> Matcher<'r, 'a, T> {
    pub fn new(reader: &'r Reader<'a, T>, selector: &'r Selector) -> Self {
        Self { reader, selector }
    }

    pub fn run(
        &self,
        start: Option<&T::Node>,
        options: MatchOptions,
    ) -> Result<Option<T::Node>, Interrupted> {
        let target = self.selector.target_index();
        Ok(self
            .run_chain(start, options)?
            .and_then(|chain| chain.get(target).cloned()))
    }

    pub fn run_chain(
        &self,
        start: Option<&T::Node>,
        options: MatchOptions,
    ) -> Result<Option<Vec<T::Node>>, Interrupted> {
        if self.selector.segments.is_empty() {
            return Ok(None);
        }

        let start = match start {
            Some(node) => node.clone(),
            None => match self.reader.root()? {
                Some(root) => root,
                None => return Ok(None),
            },
        };
        let scope = if self.selector.root_anchored {
            self.reader.root_of(&start)?
        } else {
            start
        };

        if options.fast_query && !self.selector.fast_query.is_empty() {
            return self.fast_query(&scope);
        }

        let mut matched = Vec::with_capacity(self.selector.segments.len());

        if options.quick_find && !self.selector.root_anchored {
            if let Some(keys) = &self.selector.quick_find {
                for candidate in self.lookup(&scope, keys)? {
                    if self.try_candidate(0, &candidate, &mut matched)? == Flow::Found {
                        return Ok(Some(matched));
                    }
                }
                return Ok(None);
            }
        }

        if self.selector.root_anchored {
            let found = self.try_candidate(0, &scope, &mut matched)? == Flow::Found;
            return Ok(found.then_some(matched));
        }

        let found = self.visit_subtree(&scope, true, &mut |node, _, _| {
            self.try_candidate(0, node, &mut matched)
        })?;
        Ok(found.then_some(matched))
    }

    fn accepts(&self, idx: usize, node: &T::Node, matched: &[T::Node]) -> Result<bool, Interrupted> {
        let seg = &self.selector.segments[idx];
        let ctx = MatchContext::new(node, matched);
        accepts(
            seg.name.as_deref(),
            seg.predicate.as_ref(),
            &ctx,
            self.reader,
        )
    }

    /// test `node` for segment `idx`, then try to complete the chain from it
    fn try_candidate(
        &self,
        idx: usize,
        node: &T::Node,
        matched: &mut Vec<T::Node>,
    ) -> Result<Flow, Interrupted> {
        if !self.accepts(idx, node, matched)? {
            return Ok(Flow::Continue);
        }
        matched.push(node.clone());
        if self.chain(idx + 1, matched)? {
            return Ok(Flow::Found);
        }
        matched.pop();
        Ok(Flow::Continue)
    }

    /// match segments `idx..` given matches for `..idx`
    fn chain(&self, idx: usize, matched: &mut Vec<T::Node>) -> Result<bool, Interrupted> {
        let Some(seg) = self.selector.segments.get(idx) else {
            return Ok(true);
        };
        let (Some(comb), Some(from)) = (&seg.combinator, matched.last().cloned()) else {
            return Ok(false);
        };
        self.visit_related(comb, &from, &mut |candidate| {
            self.try_candidate(idx, candidate, matched)
        })
    }

    // ------------------------------------------------------------------
    // candidate enumeration
    // ------------------------------------------------------------------

    /// pre-order walk below `root`, bounded by `max_descendants`
    ///
    /// the visitor sees each node with its pre-order rank (root is 0) and
    /// its depth relative to `root`.
    fn visit_subtree(
        &self,
        root: &T::Node,
        include_root: bool,
        visit: &mut dyn FnMut(&T::Node, i64, usize) -> Result<Flow, Interrupted>,
    ) -> Result<bool, Interrupted> {
        let limit = self.reader.limits().max_descendants;
        let mut stack = vec![(root.clone(), 0usize)];
        let mut rank: i64 = -1;

        while let Some((node, depth)) = stack.pop() {
            rank += 1;
            if rank as usize > limit {
                break;
            }
            if rank > 0 || include_root {
                match visit(&node, rank, depth)? {
                    Flow::Continue => {}
                    Flow::Stop => return Ok(false),
                    Flow::Found => return Ok(true),
                }
            }
            let children = self.reader.children(&node)?;
            stack.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
        }
        Ok(false)
    }

    fn finish(flow: Flow) -> Option<bool> {
        match flow {
            Flow::Continue => None,
            Flow::Stop => Some(false),
            Flow::Found => Some(true),
        }
    }

    /// candidates for the next segment, reached from `from` through `comb`
    fn visit_related(
        &self,
        comb: &Combinator,
        from: &T::Node,
        visit: Visit<'_, T::Node>,
    ) -> Result<bool, Interrupted> {
        let index = &comb.index;
        let max = index.max_offset();
        let beyond = |offset: i64| max.is_some_and(|m| offset > m);
        let max_children = self.reader.limits().max_children;

        match comb.kind {
            CombinatorKind::Child => {
                let count = self.reader.child_count(from)?.min(max_children);
                for i in 0..count {
                    let offset = i as i64 + 1;
                    if beyond(offset) {
                        break;
                    }
                    if !index.accepts(offset) {
                        continue;
                    }
                    if let Some(child) = self.reader.child(from, i)? {
                        if let Some(found) = Self::finish(visit(&child)?) {
                            return Ok(found);
                        }
                    }
                }
                Ok(false)
            }
            CombinatorKind::Descendant => self.visit_subtree(from, false, &mut |node, rank, _| {
                if beyond(rank) {
                    return Ok(Flow::Stop);
                }
                if !index.accepts(rank) {
                    return Ok(Flow::Continue);
                }
                visit(node)
            }),
            CombinatorKind::Ancestor | CombinatorKind::AnyAncestor => {
                let mut cur = from.clone();
                let mut depth = 0i64;
                while let Some(parent) = self.reader.parent(&cur)? {
                    depth += 1;
                    if beyond(depth) || depth as usize > self.reader.limits().max_descendants {
                        break;
                    }
                    if index.accepts(depth) {
                        if let Some(found) = Self::finish(visit(&parent)?) {
                            return Ok(found);
                        }
                    }
                    cur = parent;
                }
                Ok(false)
            }
            CombinatorKind::NextSibling
            | CombinatorKind::PrevSibling
            | CombinatorKind::Sibling => {
                let Some((parent, pos, count)) = self.siblings(from)? else {
                    return Ok(false);
                };
                let order: Vec<(usize, i64)> = match comb.kind {
                    CombinatorKind::NextSibling => {
                        (pos + 1..count).map(|j| (j, (j - pos) as i64)).collect()
                    }
                    CombinatorKind::PrevSibling => {
                        (0..pos).rev().map(|j| (j, (pos - j) as i64)).collect()
                    }
                    _ => (0..count)
                        .filter(|j| *j != pos)
                        .map(|j| (j, j as i64 + 1))
                        .collect(),
                };
                self.visit_positions(&parent, &order, comb, visit)
            }
        }
    }

    /// candidates for the previous segment, given the node matched by the
    /// segment `comb` belongs to
    fn visit_inverse(
        &self,
        comb: &Combinator,
        node: &T::Node,
        visit: Visit<'_, T::Node>,
    ) -> Result<bool, Interrupted> {
        let index = &comb.index;

        match comb.kind {
            CombinatorKind::Child => {
                let Some(pos) = self.reader.index_of(node)? else {
                    return Ok(false);
                };
                if !index.accepts(pos as i64 + 1) {
                    return Ok(false);
                }
                match self.reader.parent(node)? {
                    Some(parent) => Ok(Self::finish(visit(&parent)?).unwrap_or(false)),
                    None => Ok(false),
                }
            }
            CombinatorKind::Descendant => {
                let mut cur = node.clone();
                let mut steps = 0;
                while let Some(ancestor) = self.reader.parent(&cur)? {
                    steps += 1;
                    if steps > self.reader.limits().max_descendants {
                        break;
                    }
                    let ok = match index {
                        IndexPredicate::Any => true,
                        _ => self
                            .descendant_rank(&ancestor, node, index.max_offset())?
                            .is_some_and(|rank| index.accepts(rank)),
                    };
                    if ok {
                        if let Some(found) = Self::finish(visit(&ancestor)?) {
                            return Ok(found);
                        }
                    }
                    cur = ancestor;
                }
                Ok(false)
            }
            CombinatorKind::Ancestor | CombinatorKind::AnyAncestor => {
                let max = index.max_offset();
                self.visit_subtree(node, false, &mut |n, _, depth| {
                    let depth = depth as i64;
                    if max.is_some_and(|m| depth > m) || !index.accepts(depth) {
                        return Ok(Flow::Continue);
                    }
                    visit(n)
                })
            }
            CombinatorKind::NextSibling
            | CombinatorKind::PrevSibling
            | CombinatorKind::Sibling => {
                let Some((parent, pos, count)) = self.siblings(node)? else {
                    return Ok(false);
                };
                let order: Vec<(usize, i64)> = match comb.kind {
                    // `node` follows the previous match: look before it
                    CombinatorKind::NextSibling => {
                        (0..pos).rev().map(|j| (j, (pos - j) as i64)).collect()
                    }
                    CombinatorKind::PrevSibling => {
                        (pos + 1..count).map(|j| (j, (j - pos) as i64)).collect()
                    }
                    _ => {
                        if !index.accepts(pos as i64 + 1) {
                            return Ok(false);
                        }
                        // position already checked, any other sibling will do
                        (0..count).filter(|j| *j != pos).map(|j| (j, 1)).collect()
                    }
                };
                let relaxed = Combinator {
                    kind: comb.kind,
                    index: match comb.kind {
                        CombinatorKind::Sibling => IndexPredicate::Any,
                        _ => comb.index.clone(),
                    },
                };
                self.visit_positions(&parent, &order, &relaxed, visit)
            }
        }
    }

    /// parent, 0-based position and bounded sibling count of `node`
    fn siblings(&self, node: &T::Node) -> Result<Option<(T::Node, usize, usize)>, Interrupted> {
        let Some(parent) = self.reader.parent(node)? else {
            return Ok(None);
        };
        let Some(pos) = self.reader.index_of(node)? else {
            return Ok(None);
        };
        let count = self
            .reader
            .child_count(&parent)?
            .min(self.reader.limits().max_children);
        Ok(Some((parent, pos, count)))
    }

    /// visit children of `parent` at `(position, offset)` pairs, in order
    fn visit_positions(
        &self,
        parent: &T::Node,
        order: &[(usize, i64)],
        comb: &Combinator,
        visit: Visit<'_, T::Node>,
    ) -> Result<bool, Interrupted> {
        let max = comb.index.max_offset();
        let ordered_by_offset = comb.kind != CombinatorKind::Sibling;
        for (pos, offset) in order {
            if ordered_by_offset && max.is_some_and(|m| *offset > m) {
                break;
            }
            if !comb.index.accepts(*offset) {
                continue;
            }
            if let Some(sibling) = self.reader.child(parent, *pos)? {
                if let Some(found) = Self::finish(visit(&sibling)?) {
                    return Ok(found);
                }
            }
        }
        Ok(false)
    }

    /// pre-order rank of `node` below `ancestor`
    fn descendant_rank(
        &self,
        ancestor: &T::Node,
        node: &T::Node,
        max: Option<i64>,
    ) -> Result<Option<i64>, Interrupted> {
        let mut rank = None;
        self.visit_subtree(ancestor, false, &mut |n, r, _| {
            if max.is_some_and(|m| r > m) {
                return Ok(Flow::Stop);
            }
            if n == node {
                rank = Some(r);
                return Ok(Flow::Found);
            }
            Ok(Flow::Continue)
        })?;
        Ok(rank)
    }

    // ------------------------------------------------------------------
    // indexed fast paths
    // ------------------------------------------------------------------

    /// indexed candidates within `scope`, deduplicated, lookup order kept
    fn lookup(&self, scope: &T::Node, keys: &[FastKey]) -> Result<Vec<T::Node>, Interrupted> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for key in keys {
            let found = match key {
                FastKey::Id(v) | FastKey::Vid(v) => self.reader.find_by_id(scope, v)?,
                FastKey::Text(v) => self.reader.find_by_text(scope, v)?,
            };
            for node in found {
                if seen.insert(node.clone()) {
                    out.push(node);
                }
            }
        }
        Ok(out)
    }

    fn fast_query(&self, scope: &T::Node) -> Result<Option<Vec<T::Node>>, Interrupted> {
        let Some(anchor) = self.selector.fast_query.last() else {
            return Ok(None);
        };

        for candidate in self.lookup(scope, &anchor.keys)? {
            // fast query is only compiled for selectors that never read `prev`
            if !self.accepts(anchor.segment, &candidate, &[])? {
                continue;
            }
            let mut reversed = vec![candidate];
            if let Some(chain) = self.backward(anchor.segment, anchor.segment, scope, &mut reversed)? {
                return Ok(Some(chain));
            }
        }
        Ok(None)
    }

    /// `reversed` holds matches for segments `idx..=anchor`, last entry is
    /// segment `idx`; extend it down to segment 0, then finish forward
    fn backward(
        &self,
        idx: usize,
        anchor: usize,
        scope: &T::Node,
        reversed: &mut Vec<T::Node>,
    ) -> Result<Option<Vec<T::Node>>, Interrupted> {
        let Some(node) = reversed.last().cloned() else {
            return Ok(None);
        };

        if idx == 0 {
            let in_scope = if self.selector.root_anchored {
                &node == scope
            } else {
                self.reader.is_within(&node, scope)?
            };
            if !in_scope {
                return Ok(None);
            }
            let mut matched: Vec<T::Node> = reversed.iter().rev().cloned().collect();
            return Ok(self.chain(anchor + 1, &mut matched)?.then_some(matched));
        }

        let Some(comb) = &self.selector.segments[idx].combinator else {
            return Ok(None);
        };
        let mut result = None;
        self.visit_inverse(comb, &node, &mut |candidate| {
            if !self.accepts(idx - 1, candidate, &[])? {
                return Ok(Flow::Continue);
            }
            reversed.push(candidate.clone());
            if let Some(chain) = self.backward(idx - 1, anchor, scope, reversed)? {
                result = Some(chain);
                return Ok(Flow::Found);
            }
            reversed.pop();
            Ok(Flow::Continue)
        })?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Interrupt, Limits, QueryEngine};
    use crate::selector::compile;
    use crate::tree::fixture::{FixtureNode, FixtureTree};
    use crate::tree::{Attr, AttrValue};
    use serde_json::json;

    /// Root
    ///   List
    ///     Item(text=a) > Label(text=one)
    ///     Item(text=b) > Label(text=two)
    ///     Item(text=c) > Label(text=three)
    ///   Bar
    ///     Button(text=OK)
    ///     Button(id=confirm)
    ///     Button(id=cancel)
    fn tree() -> FixtureTree {
        let item = |t: &str, label: &str| {
            json!({ "name": "Item", "text": t, "children": [ { "name": "Label", "text": label } ] })
        };
        FixtureTree::from_value(json!({
            "name": "Root",
            "children": [
                { "name": "List", "children": [ item("a", "one"), item("b", "two"), item("c", "three") ] },
                { "name": "Bar", "children": [
                    { "name": "android.widget.Button", "text": "OK" },
                    { "name": "android.widget.Button", "id": "confirm" },
                    { "name": "android.widget.Button", "id": "app:id/cancel" }
                ] }
            ]
        }))
        .unwrap()
    }

    fn query_with(t: &FixtureTree, src: &str, options: MatchOptions) -> Option<FixtureNode> {
        let sel = compile(src).unwrap();
        let engine = QueryEngine::new(t, None, Limits::default());
        engine.query(&sel, None, options, Interrupt::none(), 0).unwrap()
    }

    fn query(t: &FixtureTree, src: &str) -> Option<FixtureNode> {
        query_with(t, src, MatchOptions::default())
    }

    fn text(t: &FixtureTree, n: &FixtureNode) -> Option<String> {
        match t.attr(n, Attr::Text).unwrap() {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    #[test]
    fn test_next_sibling_scenario() {
        let t = tree();
        let found = query(&t, "Button[text=`OK`] + [id=`confirm`]").unwrap();
        assert_eq!(Some(found), t.node_by_id("confirm"));
    }

    #[test]
    fn test_child_offsets() {
        let t = tree();
        let n = query(&t, "List >2 Item").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("b"));
        let n = query(&t, "List >(2n+1) Item[text != 'a']").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("c"));
        assert_eq!(query(&t, "List >4 Item"), None);
    }

    #[test]
    fn test_descendant_rank() {
        let t = tree();
        // pre-order below List: Item a(1), one(2), Item b(3), two(4)...
        let n = query(&t, "List >>4 *").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("two"));
    }

    #[test]
    fn test_ancestor_and_target_marker() {
        let t = tree();
        let n = query(&t, "Label[text='two'] < Item").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("b"));
        let n = query(&t, "Label[text='two'] <2 List").unwrap();
        assert_eq!(n, t.root_node().and_then(|r| t.child(&r, 0).unwrap()).unwrap());
        let n = query(&t, "$Item > Label[text='three']").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("c"));
    }

    #[test]
    fn test_backtracking_past_first_candidate() {
        let t = tree();
        // first Item's label is "one"; must backtrack to the third
        let n = query(&t, "Item > Label[text='three']").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("three"));
    }

    #[test]
    fn test_prev_sibling_and_sibling() {
        let t = tree();
        let n = query(&t, "[vid='cancel'] -2 Button").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("OK"));
        let n = query(&t, "[vid='cancel'] ~1 *").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("OK"));
        assert_eq!(query(&t, "[vid='cancel'] ~3 *"), None);
    }

    #[test]
    fn test_prev_reference() {
        let t = tree();
        let n = query(&t, "Item > Label[parent = prev && prev.text = 'b']").unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("two"));
    }

    #[test]
    fn test_root_anchored() {
        let t = tree();
        assert!(query(&t, "@Root > Bar").is_some());
        assert_eq!(query(&t, "@List > Item"), None);
        // anchoring climbs from any start node
        let sel = compile("@Root > List").unwrap();
        let engine = QueryEngine::new(&t, None, Limits::default());
        let start = t.node_by_text("two").unwrap();
        assert!(engine
            .query(&sel, Some(&start), MatchOptions::default(), Interrupt::none(), 0)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_quick_find_uses_index() {
        let t = tree();
        let options = MatchOptions {
            quick_find: true,
            fast_query: false,
        };
        let n = query_with(&t, "[text='two'] < Item", options).unwrap();
        assert_eq!(text(&t, &n).as_deref(), Some("b"));
    }

    #[test]
    fn test_fast_query_matches_traversal() {
        let t = tree();
        let options = MatchOptions {
            quick_find: false,
            fast_query: true,
        };
        for src in [
            "Bar > Button[text=`OK`] + [id=`confirm`]",
            "List > Item[text='b'] > Label",
            "Item >> [text='three']",
            "[text='two'] < Item - Item",
            "Bar > [vid='cancel'] ~ Button[text='OK']",
        ] {
            assert_eq!(query_with(&t, src, options), query(&t, src), "{}", src);
            assert!(query(&t, src).is_some(), "{}", src);
        }
    }

    #[test]
    fn test_fast_query_never_falls_back() {
        let t = tree();
        let options = MatchOptions {
            quick_find: false,
            fast_query: true,
        };
        // the indexed key never matches, so no traversal happens
        assert_eq!(query_with(&t, "Item[text='zzz'] > Label", options), None);
    }

    #[test]
    fn test_max_children_bound() {
        let t = tree();
        let sel = compile("List > Item[text='c']").unwrap();
        let limits = Limits {
            max_children: 2,
            max_descendants: 5000,
        };
        let engine = QueryEngine::new(&t, None, limits);
        let found = engine
            .query(&sel, None, MatchOptions::default(), Interrupt::none(), 0)
            .unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_idempotent() {
        let t = tree();
        let a = query(&t, "Item > Label[text ^= 't']");
        let b = query(&t, "Item > Label[text ^= 't']");
        assert_eq!(a, b);
        assert_eq!(text(&t, &a.unwrap()).as_deref(), Some("two"));
    }
}
