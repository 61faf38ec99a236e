//! term evaluation against a live node

use super::reader::Reader;
use super::Interrupted;
use crate::selector::expr::{CompareOp, Literal, LogicOp, Term, TextMethod};
use crate::tree::{Attr, AttrValue, TreeSource};

/// runtime value; `Null` stands for anything absent (no parent, no text,
/// failed read, overflow)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<N> {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Node(N),
}

impl<N> Value<N> {
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl<N> From<AttrValue> for Value<N> {
    fn from(v: AttrValue) -> Self {
        match v {
            AttrValue::Null => Value::Null,
            AttrValue::Bool(b) => Value::Bool(b),
            AttrValue::Int(n) => Value::Int(n),
            AttrValue::Text(s) => Value::Text(s),
        }
    }
}

impl<N> From<&Literal> for Value<N> {
    fn from(lit: &Literal) -> Self {
        match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::Int(*n),
            Literal::Text(s) => Value::Text(s.clone()),
        }
    }
}

/// the node under test plus the nodes matched by earlier segments
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'c, N> {
    pub current: &'c N,
    /// earlier matches in segment order; the last one is `prev`
    pub matched: &'c [N],
}

impl<'c, N: Clone> MatchContext<'c, N> {
    pub fn new(current: &'c N, matched: &'c [N]) -> Self {
        Self { current, matched }
    }

    /// `getPrev(k)`: 0 is the current node, 1 is `prev`
    pub fn prev(&self, k: i64) -> Option<N> {
        if k == 0 {
            return Some(self.current.clone());
        }
        let k = usize::try_from(k).ok()?;
        let len = self.matched.len();
        if k > len {
            return None;
        }
        self.matched.get(len - k).cloned()
    }
}

fn node_or_null<N>(node: Option<N>) -> Value<N> {
    node.map(Value::Node).unwrap_or(Value::Null)
}

/// evaluate a checked term
pub fn eval<T: TreeSource>(
    term: &Term,
    ctx: &MatchContext<'_, T::Node>,
    reader: &Reader<'_, T>,
) -> Result<Value<T::Node>, Interrupted> {
    let node_of = |t: &Term| -> Result<Option<T::Node>, Interrupted> {
        match eval(t, ctx, reader)? {
            Value::Node(n) => Ok(Some(n)),
            _ => Ok(None),
        }
    };

    Ok(match term {
        Term::Lit(lit) => lit.into(),
        Term::Current => Value::Node(ctx.current.clone()),
        Term::Prev => node_or_null(ctx.prev(1)),
        Term::GetPrev(k) => match eval(k, ctx, reader)?.as_int() {
            Some(k) => node_or_null(ctx.prev(k)),
            None => Value::Null,
        },
        Term::Attr(recv, attr) => match node_of(recv)? {
            Some(n) => reader.attr(&n, *attr)?.into(),
            None => Value::Null,
        },
        Term::Parent(recv) => match node_of(recv)? {
            Some(n) => node_or_null(reader.parent(&n)?),
            None => Value::Null,
        },
        Term::Index(recv) => match node_of(recv)? {
            Some(n) => reader
                .index_of(&n)?
                .map(|i| Value::Int(i as i64))
                .unwrap_or(Value::Null),
            None => Value::Null,
        },
        Term::Depth(recv) => match node_of(recv)? {
            Some(n) => Value::Int(reader.depth(&n)? as i64),
            None => Value::Null,
        },
        Term::ChildCount(recv) => match node_of(recv)? {
            Some(n) => Value::Int(reader.child_count(&n)? as i64),
            None => Value::Null,
        },
        Term::GetChild(recv, index) => {
            let Some(n) = node_of(recv)? else {
                return Ok(Value::Null);
            };
            match eval(index, ctx, reader)?.as_int() {
                Some(i) if i >= 0 => node_or_null(reader.child(&n, i as usize)?),
                _ => Value::Null,
            }
        }
        Term::TextLength(recv) => match eval(recv, ctx, reader)? {
            Value::Text(s) => Value::Int(s.chars().count() as i64),
            _ => Value::Null,
        },
        Term::TextCall(method, recv, arg) => {
            let subject = eval(recv, ctx, reader)?;
            let arg = eval(arg, ctx, reader)?;
            text_call(*method, subject, arg)
        }
        Term::Arith(op, l, r) => {
            let l = eval(l, ctx, reader)?.as_int();
            let r = eval(r, ctx, reader)?.as_int();
            match (l, r) {
                (Some(a), Some(b)) => op.apply(a, b).map(Value::Int).unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
        Term::Neg(t) => match eval(t, ctx, reader)?.as_int().and_then(i64::checked_neg) {
            Some(n) => Value::Int(n),
            None => Value::Null,
        },
        Term::Not(t) => Value::Bool(!eval(t, ctx, reader)?.is_true()),
        Term::Compare(op, l, r) => {
            let l = eval(l, ctx, reader)?;
            let r = eval(r, ctx, reader)?;
            Value::Bool(compare(*op, &l, &r))
        }
        Term::Regex {
            negated,
            subject,
            pattern,
        } => match eval(subject, ctx, reader)? {
            Value::Text(s) => Value::Bool(pattern.is_match(&s) != *negated),
            _ => Value::Bool(*negated),
        },
        Term::Logic(op, l, r) => {
            let left = eval(l, ctx, reader)?.is_true();
            match (op, left) {
                (LogicOp::And, false) => Value::Bool(false),
                (LogicOp::Or, true) => Value::Bool(true),
                _ => Value::Bool(eval(r, ctx, reader)?.is_true()),
            }
        }
    })
}

fn text_call<N>(method: TextMethod, subject: Value<N>, arg: Value<N>) -> Value<N> {
    match (method, subject, arg) {
        (TextMethod::StartsWith, Value::Text(s), Value::Text(a)) => Value::Bool(s.starts_with(&a)),
        (TextMethod::EndsWith, Value::Text(s), Value::Text(a)) => Value::Bool(s.ends_with(&a)),
        (TextMethod::Contains, Value::Text(s), Value::Text(a)) => Value::Bool(s.contains(&a)),
        (TextMethod::Get, Value::Text(s), Value::Int(i)) if i >= 0 => s
            .chars()
            .nth(i as usize)
            .map(|c| Value::Text(c.to_string()))
            .unwrap_or(Value::Null),
        (TextMethod::Get, _, _) => Value::Null,
        _ => Value::Bool(false),
    }
}

/// compare two values; text ops on null are false (negated: true)
fn compare<N: PartialEq>(op: CompareOp, l: &Value<N>, r: &Value<N>) -> bool {
    match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            match (l.as_int(), r.as_int()) {
                (Some(a), Some(b)) => match op {
                    CompareOp::Gt => a > b,
                    CompareOp::Gte => a >= b,
                    CompareOp::Lt => a < b,
                    _ => a <= b,
                },
                _ => false,
            }
        }
        _ => {
            let positive = match (l, r) {
                (Value::Text(a), Value::Text(b)) => match op {
                    CompareOp::Start | CompareOp::NotStart => a.starts_with(b.as_str()),
                    CompareOp::Include | CompareOp::NotInclude => a.contains(b.as_str()),
                    CompareOp::End | CompareOp::NotEnd => a.ends_with(b.as_str()),
                    _ => false,
                },
                _ => return op.is_negated(),
            };
            positive != op.is_negated()
        }
    }
}

/// kind filter: `name` equals the filter or ends with `.{filter}`
pub fn name_matches(actual: &str, filter: &str) -> bool {
    actual == filter
        || (actual.len() > filter.len()
            && actual.ends_with(filter)
            && actual.as_bytes()[actual.len() - filter.len() - 1] == b'.')
}

/// test a node against a segment's name filter and predicate
pub fn accepts<T: TreeSource>(
    name: Option<&str>,
    predicate: Option<&Term>,
    ctx: &MatchContext<'_, T::Node>,
    reader: &Reader<'_, T>,
) -> Result<bool, Interrupted> {
    if let Some(filter) = name {
        let actual = reader.attr(ctx.current, Attr::Name)?;
        match actual.as_str() {
            Some(actual) if name_matches(actual, filter) => {}
            _ => return Ok(false),
        }
    }
    match predicate {
        Some(term) => Ok(eval(term, ctx, reader)?.is_true()),
        None => Ok(true),
    }
}
