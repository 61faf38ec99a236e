//! compiled selector types

use std::fmt;

use super::expr::Term;

/// traversal relation from the previous segment's match to the next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinatorKind {
    /// `>` child, offset = child position
    Child,
    /// `>>` descendant, offset = pre-order rank
    Descendant,
    /// `<` ancestor, offset = depth above (1 = parent)
    Ancestor,
    /// `<<` any ancestor
    AnyAncestor,
    /// `+` following sibling, offset = distance
    NextSibling,
    /// `-` preceding sibling, offset = distance
    PrevSibling,
    /// `~` any other sibling, offset = absolute position
    Sibling,
}

impl CombinatorKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            CombinatorKind::Child => ">",
            CombinatorKind::Descendant => ">>",
            CombinatorKind::Ancestor => "<",
            CombinatorKind::AnyAncestor => "<<",
            CombinatorKind::NextSibling => "+",
            CombinatorKind::PrevSibling => "-",
            CombinatorKind::Sibling => "~",
        }
    }
}

/// largest `|a|` or `|b|` a written index may use
pub const MAX_INDEX: i64 = 1_000_000;

/// constraint on the 1-based offset a combinator walks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexPredicate {
    Any,
    /// explicit offsets, sorted and deduplicated
    List(Vec<i64>),
    /// residue class `a*n + b`, n >= 0
    Formula { a: i64, b: i64 },
}

impl IndexPredicate {
    pub fn accepts(&self, offset: i64) -> bool {
        if offset < 1 {
            return false;
        }
        match self {
            IndexPredicate::Any => true,
            IndexPredicate::List(list) => list.binary_search(&offset).is_ok(),
            IndexPredicate::Formula { a, b } => {
                // widened so hand-built formulas near the i64 edges can't overflow
                let (a, b, offset) = (i128::from(*a), i128::from(*b), i128::from(offset));
                if a > 0 {
                    offset >= b && (offset - b) % a == 0
                } else if a < 0 {
                    offset <= b && (b - offset) % (-a) == 0
                } else {
                    offset == b
                }
            }
        }
    }

    /// largest offset that can ever be accepted, if bounded
    pub fn max_offset(&self) -> Option<i64> {
        match self {
            IndexPredicate::Any => None,
            IndexPredicate::List(list) => list.last().copied(),
            IndexPredicate::Formula { a, b } if *a <= 0 => Some(*b),
            IndexPredicate::Formula { .. } => None,
        }
    }

    /// a negative formula ranges over offsets whose meaning depends on where
    /// the walk starts, so positional caching is unsafe
    pub fn is_cache_safe(&self) -> bool {
        match self {
            IndexPredicate::Formula { a, b } => *a >= 0 && *b >= 0,
            _ => true,
        }
    }
}

impl fmt::Display for IndexPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexPredicate::Any => Ok(()),
            IndexPredicate::List(list) if list.len() == 1 => write!(f, "{}", list[0]),
            IndexPredicate::List(list) => {
                let parts: Vec<String> = list.iter().map(|o| o.to_string()).collect();
                write!(f, "({})", parts.join(","))
            }
            IndexPredicate::Formula { a, b } => {
                write!(f, "({}n", a)?;
                if *b > 0 {
                    write!(f, "+{}", b)?;
                } else if *b < 0 {
                    write!(f, "{}", b)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combinator {
    pub kind: CombinatorKind,
    pub index: IndexPredicate,
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.symbol(), self.index)
    }
}

/// key for an indexed lookup fast path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FastKey {
    Id(String),
    Vid(String),
    Text(String),
}

impl FastKey {
    pub fn value(&self) -> &str {
        match self {
            FastKey::Id(s) | FastKey::Vid(s) | FastKey::Text(s) => s,
        }
    }
}

/// fast-query candidate: segment index plus the keys that locate it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastQueryEntry {
    pub segment: usize,
    pub keys: Vec<FastKey>,
}

/// one predicate + combinator step
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// how this segment is reached from the previous one; `None` for the first
    pub combinator: Option<Combinator>,
    /// kind filter: `name` equals this or ends with `.{this}`
    pub name: Option<String>,
    pub predicate: Option<Term>,
    pub target: bool,
}

impl Segment {
    pub fn uses_prev(&self) -> bool {
        self.predicate.as_ref().is_some_and(|p| p.uses_prev())
    }
}

/// a compiled selector
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub segments: Vec<Segment>,
    pub root_anchored: bool,
    /// indexed candidates for the first segment
    pub quick_find: Option<Vec<FastKey>>,
    pub fast_query: Vec<FastQueryEntry>,
    pub use_cache: bool,
}

impl Selector {
    pub fn target_index(&self) -> usize {
        self.segments
            .iter()
            .position(|s| s.target)
            .unwrap_or(self.segments.len().saturating_sub(1))
    }

    pub fn uses_prev(&self) -> bool {
        self.segments.iter().any(|s| s.uses_prev())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.root_anchored {
            write!(f, "@")?;
        }
        let explicit_target = self.target_index() + 1 != self.segments.len();
        for seg in &self.segments {
            if let Some(comb) = &seg.combinator {
                write!(f, " {} ", comb)?;
            }
            if seg.target && explicit_target {
                write!(f, "$")?;
            }
            match (&seg.name, &seg.predicate) {
                (Some(name), _) => write!(f, "{}", name)?,
                (None, None) => write!(f, "*")?,
                (None, Some(_)) => {}
            }
            if let Some(pred) = &seg.predicate {
                write!(f, "[{}]", pred.display_bare())?;
            }
        }
        Ok(())
    }
}
