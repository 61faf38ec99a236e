//! type checker: lowers parsed expressions into resolved terms
//!
//! every identifier and method is resolved against a closed schema here, so
//! the first typing error is reported with its span and evaluation never
//! looks anything up by name.

use strsim::levenshtein;

use super::error::{CompileError, CompileErrorKind, Span};
use super::expr::{
    ArithOp, BinaryOp, CompareOp, Expr, ExprKind, Literal, LogicOp, Pattern, Term, TextMethod,
    UnaryOp, ValueType,
};
use super::parser::{RawSegment, RawSelector};
use super::types::{Combinator, FastKey, FastQueryEntry, Segment, Selector};
use crate::tree::Attr;

lazy_static::lazy_static! {
    /// every bare identifier or function the schema knows, for suggestions
    static ref KNOWN_NAMES: Vec<&'static str> = {
        let mut names: Vec<&'static str> = Attr::all().iter().map(|a| a.name()).collect();
        names.extend(["parent", "index", "depth", "childCount", "prev", "getPrev", "getChild"]);
        names
    };
}

fn suggest(name: &str) -> Option<String> {
    KNOWN_NAMES
        .iter()
        .map(|known| (levenshtein(name, known), *known))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, known)| known.to_string())
}

type Typed = (Term, ValueType);

fn mismatch(expected: &'static str, found: ValueType, span: Span) -> CompileError {
    CompileError::new(
        CompileErrorKind::MismatchedType {
            expected,
            found: found.to_string(),
        },
        span,
    )
}

/// lower and type-check a single expression
pub fn check_expr(expr: &Expr) -> Result<Typed, CompileError> {
    match &expr.kind {
        ExprKind::Literal(lit) => Ok((Term::Lit(lit.clone()), lit.value_type())),
        ExprKind::Ident(name) => ident(name, expr.span),
        ExprKind::Member {
            object,
            name,
            name_span,
        } => {
            let receiver = check_expr(object)?;
            member(receiver, name, *name_span)
        }
        ExprKind::Call {
            receiver: None,
            name,
            name_span,
            args,
        } => free_call(name, *name_span, args),
        ExprKind::Call {
            receiver: Some(object),
            name,
            name_span,
            args,
        } => {
            let receiver = check_expr(object)?;
            method_call(receiver, name, *name_span, args)
        }
        ExprKind::Unary { op, operand } => {
            let (term, ty) = check_expr(operand)?;
            match op {
                UnaryOp::Not => {
                    if ty != ValueType::Bool {
                        return Err(mismatch("boolean", ty, operand.span));
                    }
                    Ok((Term::Not(Box::new(term)), ValueType::Bool))
                }
                UnaryOp::Neg => {
                    if ty != ValueType::Int {
                        return Err(mismatch("integer", ty, operand.span));
                    }
                    if let Term::Lit(Literal::Int(n)) = term {
                        let folded = n.checked_neg().ok_or_else(|| {
                            CompileError::new(
                                CompileErrorKind::InvalidNumber(format!("-{}", n)),
                                expr.span,
                            )
                        })?;
                        return Ok((Term::Lit(Literal::Int(folded)), ValueType::Int));
                    }
                    Ok((Term::Neg(Box::new(term)), ValueType::Int))
                }
            }
        }
        ExprKind::Binary { op, left, right } => binary(*op, left, right),
    }
}

fn node_property(receiver: Term, name: &str) -> Option<Typed> {
    if let Some(attr) = Attr::parse(name) {
        return Some((Term::Attr(Box::new(receiver), attr), attr.value_type()));
    }
    let boxed = Box::new(receiver);
    match name {
        "parent" => Some((Term::Parent(boxed), ValueType::Node)),
        "index" => Some((Term::Index(boxed), ValueType::Int)),
        "depth" => Some((Term::Depth(boxed), ValueType::Int)),
        "childCount" => Some((Term::ChildCount(boxed), ValueType::Int)),
        _ => None,
    }
}

fn ident(name: &str, span: Span) -> Result<Typed, CompileError> {
    if name == "prev" {
        return Ok((Term::Prev, ValueType::Node));
    }
    node_property(Term::Current, name).ok_or_else(|| {
        CompileError::new(
            CompileErrorKind::UnknownIdentifier {
                name: name.to_string(),
                suggestion: suggest(name),
            },
            span,
        )
    })
}

fn member(receiver: Typed, name: &str, span: Span) -> Result<Typed, CompileError> {
    let (term, ty) = receiver;
    let resolved = match ty {
        ValueType::Node => node_property(term, name),
        ValueType::Text if name == "length" => Some((Term::TextLength(Box::new(term)), ValueType::Int)),
        _ => None,
    };
    resolved.ok_or_else(|| {
        CompileError::new(
            CompileErrorKind::UnknownMethod {
                receiver: ty,
                method: name.to_string(),
            },
            span,
        )
    })
}

/// check argument count and types, returning the lowered arguments
fn arguments(
    method: &str,
    span: Span,
    args: &[Expr],
    expected: &[ValueType],
) -> Result<Vec<Term>, CompileError> {
    if args.len() != expected.len() {
        return Err(CompileError::new(
            CompileErrorKind::WrongArgumentCount {
                method: method.to_string(),
                expected: expected.len(),
                found: args.len(),
            },
            span,
        ));
    }
    let mut out = Vec::with_capacity(args.len());
    for (position, (arg, want)) in args.iter().zip(expected).enumerate() {
        let (term, ty) = check_expr(arg)?;
        if ty != *want {
            return Err(CompileError::new(
                CompileErrorKind::WrongArgumentType {
                    method: method.to_string(),
                    position: position + 1,
                    expected: *want,
                    found: ty,
                },
                arg.span,
            ));
        }
        out.push(term);
    }
    Ok(out)
}

fn single(mut args: Vec<Term>) -> Box<Term> {
    Box::new(args.remove(0))
}

fn free_call(name: &str, span: Span, args: &[Expr]) -> Result<Typed, CompileError> {
    match name {
        "getPrev" => {
            let k = single(arguments(name, span, args, &[ValueType::Int])?);
            let term = match *k {
                Term::Lit(Literal::Int(0)) => Term::Current,
                Term::Lit(Literal::Int(1)) => Term::Prev,
                other => Term::GetPrev(Box::new(other)),
            };
            Ok((term, ValueType::Node))
        }
        "getChild" => method_call((Term::Current, ValueType::Node), name, span, args),
        _ => Err(CompileError::new(
            CompileErrorKind::UnknownIdentifier {
                name: name.to_string(),
                suggestion: suggest(name),
            },
            span,
        )),
    }
}

fn method_call(
    receiver: Typed,
    name: &str,
    span: Span,
    args: &[Expr],
) -> Result<Typed, CompileError> {
    let (term, ty) = receiver;
    let recv = Box::new(term);

    match (ty, name) {
        (ValueType::Node, "getChild") => {
            let i = single(arguments(name, span, args, &[ValueType::Int])?);
            Ok((Term::GetChild(recv, i), ValueType::Node))
        }
        (ValueType::Text, "startsWith" | "endsWith" | "contains") => {
            let method = match name {
                "startsWith" => TextMethod::StartsWith,
                "endsWith" => TextMethod::EndsWith,
                _ => TextMethod::Contains,
            };
            let arg = single(arguments(name, span, args, &[ValueType::Text])?);
            Ok((Term::TextCall(method, recv, arg), ValueType::Bool))
        }
        (ValueType::Text, "get") => {
            let arg = single(arguments(name, span, args, &[ValueType::Int])?);
            Ok((Term::TextCall(TextMethod::Get, recv, arg), ValueType::Text))
        }
        (ValueType::Int, "plus" | "minus" | "times" | "div" | "rem") => {
            let op = match name {
                "plus" => ArithOp::Add,
                "minus" => ArithOp::Sub,
                "times" => ArithOp::Mul,
                "div" => ArithOp::Div,
                _ => ArithOp::Rem,
            };
            let arg = single(arguments(name, span, args, &[ValueType::Int])?);
            Ok((Term::Arith(op, recv, arg), ValueType::Int))
        }
        _ => Err(CompileError::new(
            CompileErrorKind::UnknownMethod {
                receiver: ty,
                method: name.to_string(),
            },
            span,
        )),
    }
}

fn binary(op: BinaryOp, left: &Expr, right: &Expr) -> Result<Typed, CompileError> {
    let (lt, lty) = check_expr(left)?;

    match op {
        BinaryOp::Logic(logic) => {
            if lty != ValueType::Bool {
                return Err(mismatch("boolean", lty, left.span));
            }
            let (rt, rty) = check_expr(right)?;
            if rty != ValueType::Bool {
                return Err(mismatch("boolean", rty, right.span));
            }
            Ok((Term::Logic(logic, Box::new(lt), Box::new(rt)), ValueType::Bool))
        }
        BinaryOp::Arith(arith) => {
            if lty != ValueType::Int {
                return Err(mismatch("integer", lty, left.span));
            }
            let (rt, rty) = check_expr(right)?;
            if rty != ValueType::Int {
                return Err(mismatch("integer", rty, right.span));
            }
            Ok((Term::Arith(arith, Box::new(lt), Box::new(rt)), ValueType::Int))
        }
        BinaryOp::Compare(cmp) => compare(cmp, (lt, lty), left.span, right),
    }
}

fn compare(
    op: CompareOp,
    left: Typed,
    left_span: Span,
    right: &Expr,
) -> Result<Typed, CompileError> {
    let (lt, lty) = left;

    if matches!(op, CompareOp::Matches | CompareOp::NotMatches) {
        if lty != ValueType::Text {
            return Err(mismatch("text", lty, left_span));
        }
        let ExprKind::Literal(Literal::Text(source)) = &right.kind else {
            let (_, rty) = check_expr(right)?;
            return Err(CompileError::new(
                CompileErrorKind::MismatchedType {
                    expected: "string literal",
                    found: rty.to_string(),
                },
                right.span,
            ));
        };
        let pattern = Pattern::new(source).map_err(|e| {
            CompileError::new(CompileErrorKind::InvalidRegex(e.to_string()), right.span)
        })?;
        return Ok((
            Term::Regex {
                negated: op == CompareOp::NotMatches,
                subject: Box::new(lt),
                pattern,
            },
            ValueType::Bool,
        ));
    }

    let (rt, rty) = check_expr(right)?;

    if op.is_text_op() {
        if lty != ValueType::Text {
            return Err(mismatch("text", lty, left_span));
        }
        if rty != ValueType::Text {
            return Err(mismatch("text", rty, right.span));
        }
    } else if op.is_ordering() {
        if lty != ValueType::Int {
            return Err(mismatch("integer", lty, left_span));
        }
        if rty != ValueType::Int {
            return Err(mismatch("integer", rty, right.span));
        }
    } else if lty != rty && lty != ValueType::Null && rty != ValueType::Null {
        return Err(CompileError::new(
            CompileErrorKind::MismatchedType {
                expected: "operands of the same type",
                found: format!("{} and {}", lty, rty),
            },
            left_span.to(right.span),
        ));
    }

    Ok((Term::Compare(op, Box::new(lt), Box::new(rt)), ValueType::Bool))
}

// ============================================================================
// Selector assembly
// ============================================================================

/// check a raw selector and compute its fast-path flags
pub fn check_selector(raw: RawSelector) -> Result<Selector, CompileError> {
    let mut target_seen = false;
    for seg in &raw.segments {
        if seg.target {
            if target_seen {
                return Err(CompileError::new(CompileErrorKind::DuplicateTarget, seg.span));
            }
            target_seen = true;
        }
    }

    let mut segments = raw
        .segments
        .into_iter()
        .map(check_segment)
        .collect::<Result<Vec<_>, _>>()?;

    if !target_seen {
        if let Some(last) = segments.last_mut() {
            last.target = true;
        }
    }

    let use_cache = segments
        .iter()
        .filter_map(|s| s.combinator.as_ref())
        .all(|c| c.index.is_cache_safe());

    let quick_find = segments
        .first()
        .and_then(|s| s.predicate.as_ref())
        .and_then(|p| fast_keys(p, true));

    let uses_prev = segments.iter().any(|s| s.uses_prev());
    let fast_query = if uses_prev {
        Vec::new()
    } else {
        segments
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let keys = fast_keys(s.predicate.as_ref()?, i == 0)?;
                Some(FastQueryEntry { segment: i, keys })
            })
            .collect()
    };

    Ok(Selector {
        segments,
        root_anchored: raw.root_anchored,
        quick_find,
        fast_query,
        use_cache,
    })
}

fn check_segment(raw: RawSegment) -> Result<Segment, CompileError> {
    let mut predicate: Option<Term> = None;
    for bracket in &raw.brackets {
        let (term, ty) = check_expr(bracket)?;
        if ty != ValueType::Bool {
            return Err(mismatch("boolean", ty, bracket.span));
        }
        predicate = Some(match predicate {
            None => term,
            Some(prev) => Term::Logic(LogicOp::And, Box::new(prev), Box::new(term)),
        });
    }

    Ok(Segment {
        combinator: raw.combinator.map(|c| Combinator {
            kind: c.kind,
            index: c.index,
        }),
        name: raw.name,
        predicate,
        target: raw.target,
    })
}

/// `id|vid|text = "literal"` on the current node, either side
fn equality_key(term: &Term) -> Option<FastKey> {
    let Term::Compare(CompareOp::Eq, l, r) = term else {
        return None;
    };
    let (attr, value) = match (l.as_ref(), r.as_ref()) {
        (Term::Attr(recv, attr), Term::Lit(Literal::Text(v)))
        | (Term::Lit(Literal::Text(v)), Term::Attr(recv, attr))
            if **recv == Term::Current =>
        {
            (*attr, v.clone())
        }
        _ => return None,
    };
    match attr {
        Attr::Id => Some(FastKey::Id(value)),
        Attr::Vid => Some(FastKey::Vid(value)),
        Attr::Text => Some(FastKey::Text(value)),
        _ => None,
    }
}

/// first top-level conjunct usable as an indexed lookup
fn fast_keys(predicate: &Term, allow_or: bool) -> Option<Vec<FastKey>> {
    predicate.conjuncts().into_iter().find_map(|conjunct| {
        if let Some(key) = equality_key(conjunct) {
            return Some(vec![key]);
        }
        if !allow_or {
            return None;
        }
        let disjuncts = conjunct.disjuncts();
        if disjuncts.len() < 2 {
            return None;
        }
        disjuncts.into_iter().map(equality_key).collect()
    })
}
