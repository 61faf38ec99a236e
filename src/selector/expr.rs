//! expression types: the parsed syntax tree and the checked term tree
//!
//! the parser produces [`Expr`] (pure syntax, names unresolved). the checker
//! lowers it into [`Term`], where every identifier and method has been
//! resolved against the schema, so evaluation never dispatches by string.

use std::fmt;

use regex::Regex;

use super::error::Span;
use crate::tree::Attr;

/// static type of an expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int,
    Text,
    Node,
    Null,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "boolean",
            ValueType::Int => "integer",
            ValueType::Text => "text",
            ValueType::Node => "node",
            ValueType::Null => "null",
        };
        write!(f, "{}", name)
    }
}

/// literal value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Literal {
    pub fn value_type(&self) -> ValueType {
        match self {
            Literal::Null => ValueType::Null,
            Literal::Bool(_) => ValueType::Bool,
            Literal::Int(_) => ValueType::Int,
            Literal::Text(_) => ValueType::Text,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Text(s) => write_quoted(f, s),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

/// comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=` or `==`
    Eq,
    /// `!=`
    Ne,
    /// `^=` starts with
    Start,
    /// `!^=`
    NotStart,
    /// `*=` contains
    Include,
    /// `!*=`
    NotInclude,
    /// `$=` ends with
    End,
    /// `!$=`
    NotEnd,
    /// `~=` full regex match
    Matches,
    /// `!~=`
    NotMatches,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// parse operator from its symbol
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "^=" => Some(CompareOp::Start),
            "!^=" => Some(CompareOp::NotStart),
            "*=" => Some(CompareOp::Include),
            "!*=" => Some(CompareOp::NotInclude),
            "$=" => Some(CompareOp::End),
            "!$=" => Some(CompareOp::NotEnd),
            "~=" => Some(CompareOp::Matches),
            "!~=" => Some(CompareOp::NotMatches),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Gte),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Lte),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Start => "^=",
            CompareOp::NotStart => "!^=",
            CompareOp::Include => "*=",
            CompareOp::NotInclude => "!*=",
            CompareOp::End => "$=",
            CompareOp::NotEnd => "!$=",
            CompareOp::Matches => "~=",
            CompareOp::NotMatches => "!~=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    /// text operators: both sides must be text
    pub fn is_text_op(&self) -> bool {
        matches!(
            self,
            CompareOp::Start
                | CompareOp::NotStart
                | CompareOp::Include
                | CompareOp::NotInclude
                | CompareOp::End
                | CompareOp::NotEnd
                | CompareOp::Matches
                | CompareOp::NotMatches
        )
    }

    /// ordering operators: both sides must be integers
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte
        )
    }

    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            CompareOp::Ne
                | CompareOp::NotStart
                | CompareOp::NotInclude
                | CompareOp::NotEnd
                | CompareOp::NotMatches
        )
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
        }
    }

    /// checked integer arithmetic; overflow and division by zero yield None
    pub fn apply(&self, a: i64, b: i64) -> Option<i64> {
        match self {
            ArithOp::Add => a.checked_add(b),
            ArithOp::Sub => a.checked_sub(b),
            ArithOp::Mul => a.checked_mul(b),
            ArithOp::Div => a.checked_div(b),
            ArithOp::Rem => a.checked_rem(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            LogicOp::And => "&&",
            LogicOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Compare(CompareOp),
    Arith(ArithOp),
    Logic(LogicOp),
}

// ============================================================================
// Syntax tree
// ============================================================================

/// parsed expression, names not yet resolved
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    Member {
        object: Box<Expr>,
        name: String,
        name_span: Span,
    },
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        name_span: Span,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

// ============================================================================
// Checked term tree
// ============================================================================

/// text methods taking one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMethod {
    StartsWith,
    EndsWith,
    Contains,
    Get,
}

impl TextMethod {
    pub fn name(&self) -> &'static str {
        match self {
            TextMethod::StartsWith => "startsWith",
            TextMethod::EndsWith => "endsWith",
            TextMethod::Contains => "contains",
            TextMethod::Get => "get",
        }
    }
}

/// regex compiled once at selector compile time, anchored for full matches
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})$", source))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// type-checked expression, ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Lit(Literal),
    /// the node under test
    Current,
    /// node matched by the previous segment
    Prev,
    /// k-th previous match, 1-based (`getPrev(1)` is `prev`)
    GetPrev(Box<Term>),
    Attr(Box<Term>, Attr),
    Parent(Box<Term>),
    /// 0-based position among siblings
    Index(Box<Term>),
    /// distance from the root, root is 0
    Depth(Box<Term>),
    ChildCount(Box<Term>),
    GetChild(Box<Term>, Box<Term>),
    TextLength(Box<Term>),
    TextCall(TextMethod, Box<Term>, Box<Term>),
    Arith(ArithOp, Box<Term>, Box<Term>),
    Neg(Box<Term>),
    Not(Box<Term>),
    Compare(CompareOp, Box<Term>, Box<Term>),
    Regex {
        negated: bool,
        subject: Box<Term>,
        pattern: Pattern,
    },
    Logic(LogicOp, Box<Term>, Box<Term>),
}

impl Term {
    /// true if evaluation depends on earlier segment matches
    pub fn uses_prev(&self) -> bool {
        match self {
            Term::Prev | Term::GetPrev(_) => true,
            Term::Lit(_) | Term::Current => false,
            Term::Attr(t, _)
            | Term::Parent(t)
            | Term::Index(t)
            | Term::Depth(t)
            | Term::ChildCount(t)
            | Term::TextLength(t)
            | Term::Neg(t)
            | Term::Not(t) => t.uses_prev(),
            Term::Regex { subject, .. } => subject.uses_prev(),
            Term::GetChild(a, b)
            | Term::TextCall(_, a, b)
            | Term::Arith(_, a, b)
            | Term::Compare(_, a, b)
            | Term::Logic(_, a, b) => a.uses_prev() || b.uses_prev(),
        }
    }

    /// flatten a chain of `&&` into its conjuncts
    pub fn conjuncts(&self) -> Vec<&Term> {
        match self {
            Term::Logic(LogicOp::And, l, r) => {
                let mut out = l.conjuncts();
                out.extend(r.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    /// flatten a chain of `||` into its disjuncts
    pub fn disjuncts(&self) -> Vec<&Term> {
        match self {
            Term::Logic(LogicOp::Or, l, r) => {
                let mut out = l.disjuncts();
                out.extend(r.disjuncts());
                out
            }
            other => vec![other],
        }
    }

    fn is_compound(&self) -> bool {
        matches!(
            self,
            Term::Arith(..) | Term::Compare(..) | Term::Regex { .. } | Term::Logic(..)
        )
    }

    /// render without the outermost parentheses
    pub fn display_bare(&self) -> String {
        let s = self.to_string();
        if self.is_compound() {
            s[1..s.len() - 1].to_string()
        } else {
            s
        }
    }
}

fn write_receiver(f: &mut fmt::Formatter<'_>, receiver: &Term) -> fmt::Result {
    match receiver {
        Term::Current => Ok(()),
        other => write!(f, "{}.", other),
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Lit(lit) => write!(f, "{}", lit),
            Term::Current => write!(f, "getPrev(0)"),
            Term::Prev => write!(f, "prev"),
            Term::GetPrev(k) => write!(f, "getPrev({})", k.display_bare()),
            Term::Attr(r, attr) => {
                write_receiver(f, r)?;
                write!(f, "{}", attr.name())
            }
            Term::Parent(r) => {
                write_receiver(f, r)?;
                write!(f, "parent")
            }
            Term::Index(r) => {
                write_receiver(f, r)?;
                write!(f, "index")
            }
            Term::Depth(r) => {
                write_receiver(f, r)?;
                write!(f, "depth")
            }
            Term::ChildCount(r) => {
                write_receiver(f, r)?;
                write!(f, "childCount")
            }
            Term::GetChild(r, i) => {
                write_receiver(f, r)?;
                write!(f, "getChild({})", i.display_bare())
            }
            Term::TextLength(r) => write!(f, "{}.length", r),
            Term::TextCall(m, r, a) => write!(f, "{}.{}({})", r, m.name(), a.display_bare()),
            Term::Arith(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Term::Neg(t) => write!(f, "-{}", t),
            Term::Not(t) => write!(f, "!{}", t),
            Term::Compare(op, l, r) => write!(f, "({} {} {})", l, op, r),
            Term::Regex {
                negated,
                subject,
                pattern,
            } => {
                let op = if *negated { "!~=" } else { "~=" };
                write!(f, "({} {} ", subject, op)?;
                write_quoted(f, pattern.source())?;
                write!(f, ")")
            }
            Term::Logic(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
        }
    }
}
