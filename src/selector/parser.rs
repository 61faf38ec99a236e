//! single-pass recursive-descent parser for selector text
//!
//! produces the raw segment chain with unresolved expressions; name
//! resolution and typing happen in the checker.

use super::error::{CompileError, CompileErrorKind, Span};
use super::expr::{
    ArithOp, BinaryOp, CompareOp, Expr, ExprKind, Literal, LogicOp, UnaryOp,
};
use super::types::{CombinatorKind, IndexPredicate, MAX_INDEX};

/// segment as written, before checking
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub combinator: Option<RawCombinator>,
    pub name: Option<String>,
    pub brackets: Vec<Expr>,
    pub target: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawCombinator {
    pub kind: CombinatorKind,
    pub index: IndexPredicate,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawSelector {
    pub root_anchored: bool,
    pub segments: Vec<RawSegment>,
}

/// compare operators, longest first so prefixes don't shadow them
const COMPARE_OPS: &[&str] = &[
    "!^=", "!*=", "!$=", "!~=", "==", "!=", "^=", "*=", "$=", "~=", ">=", "<=", "=", ">", "<",
];

/// parse selector text into its raw form
pub fn parse_selector(source: &str) -> Result<RawSelector, CompileError> {
    let mut parser = Parser::new(source);
    parser.selector()
}

/// parse a standalone predicate expression (the inside of `[...]`)
pub fn parse_expression(source: &str) -> Result<Expr, CompileError> {
    let mut parser = Parser::new(source);
    let expr = parser.expr()?;
    parser.skip_ws();
    if let Some(c) = parser.peek() {
        return Err(parser.unexpected(c, "end of expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    // ------------------------------------------------------------------
    // cursor helpers
    // ------------------------------------------------------------------

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.pos)
    }

    fn error(&self, kind: CompileErrorKind, span: Span) -> CompileError {
        CompileError::new(kind, span)
    }

    fn unexpected(&self, found: char, expected: &'static str) -> CompileError {
        self.error(
            CompileErrorKind::UnexpectedToken {
                found: found.to_string(),
                expected,
            },
            Span::new(self.pos, self.pos + found.len_utf8()),
        )
    }

    fn unexpected_here(&self, expected: &'static str) -> CompileError {
        match self.peek() {
            Some(c) => self.unexpected(c, expected),
            None => self.error(
                CompileErrorKind::UnexpectedEnd { expected },
                Span::new(self.pos, self.pos),
            ),
        }
    }

    fn expect(&mut self, c: char, expected: &'static str) -> Result<(), CompileError> {
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.unexpected_here(expected))
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    fn is_ident_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(Self::is_ident_char) {
            self.bump();
        }
        self.src[start..self.pos].to_string()
    }

    fn integer(&mut self) -> Result<i64, CompileError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        text.parse::<i64>().map_err(|_| {
            self.error(
                CompileErrorKind::InvalidNumber(text.to_string()),
                self.span_from(start),
            )
        })
    }

    // ------------------------------------------------------------------
    // selector level
    // ------------------------------------------------------------------

    fn selector(&mut self) -> Result<RawSelector, CompileError> {
        self.skip_ws();
        let root_anchored = self.eat("@");

        let mut segments = vec![self.segment(None)?];

        loop {
            self.skip_ws();
            if self.peek().is_none() {
                break;
            }
            let combinator = self.combinator()?;
            self.skip_ws();
            segments.push(self.segment(Some(combinator))?);
        }

        Ok(RawSelector {
            root_anchored,
            segments,
        })
    }

    fn combinator(&mut self) -> Result<RawCombinator, CompileError> {
        let start = self.pos;
        let kind = if self.eat(">>") {
            CombinatorKind::Descendant
        } else if self.eat(">") {
            CombinatorKind::Child
        } else if self.eat("<<") {
            CombinatorKind::AnyAncestor
        } else if self.eat("<") {
            CombinatorKind::Ancestor
        } else if self.eat("+") {
            CombinatorKind::NextSibling
        } else if self.eat("-") {
            CombinatorKind::PrevSibling
        } else if self.eat("~") {
            CombinatorKind::Sibling
        } else {
            return Err(self.unexpected_here("combinator"));
        };

        let index_start = self.pos;
        let index = match self.peek() {
            Some(c) if c.is_ascii_digit() => {
                let n = self.integer()?;
                self.check_offset(n, index_start)?;
                IndexPredicate::List(vec![n])
            }
            Some('(') => self.index_group()?,
            _ => IndexPredicate::Any,
        };

        if kind == CombinatorKind::AnyAncestor && index != IndexPredicate::Any {
            return Err(self.error(
                CompileErrorKind::InvalidIndex("'<<' takes no index, use '<'".to_string()),
                self.span_from(index_start),
            ));
        }

        Ok(RawCombinator {
            kind,
            index,
            span: self.span_from(start),
        })
    }

    fn check_offset(&self, n: i64, start: usize) -> Result<(), CompileError> {
        if n < 1 {
            return Err(self.error(
                CompileErrorKind::InvalidIndex(format!("offset {} is below 1", n)),
                self.span_from(start),
            ));
        }
        if n > MAX_INDEX {
            return Err(self.error(
                CompileErrorKind::InvalidIndex(format!("offset {} exceeds {}", n, MAX_INDEX)),
                self.span_from(start),
            ));
        }
        Ok(())
    }

    /// `(an+b)` formula or `(i, j, ...)` list
    fn index_group(&mut self) -> Result<IndexPredicate, CompileError> {
        let start = self.pos;
        self.expect('(', "'('")?;

        let close = self.rest().find(')').map(|i| self.pos + i);
        let is_formula = close.is_some_and(|end| self.src[self.pos..end].contains('n'));

        let predicate = if is_formula {
            self.formula(start)?
        } else {
            let mut list = Vec::new();
            loop {
                self.skip_ws();
                let item_start = self.pos;
                if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    return Err(self.unexpected_here("index offset"));
                }
                let n = self.integer()?;
                self.check_offset(n, item_start)?;
                list.push(n);
                self.skip_ws();
                if !self.eat(",") {
                    break;
                }
            }
            list.sort_unstable();
            list.dedup();
            IndexPredicate::List(list)
        };

        self.skip_ws();
        self.expect(')', "')'")?;
        Ok(predicate)
    }

    fn formula(&mut self, start: usize) -> Result<IndexPredicate, CompileError> {
        self.skip_ws();
        let negative = if self.eat("-") {
            true
        } else {
            self.eat("+");
            false
        };
        let a = if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.integer()?
        } else {
            1
        };
        if !self.eat("n") {
            return Err(self.error(
                CompileErrorKind::InvalidIndex("expected 'n' in index formula".to_string()),
                self.span_from(start),
            ));
        }
        let a = if negative { -a } else { a };

        self.skip_ws();
        let b = if self.eat("+") {
            self.skip_ws();
            self.integer()?
        } else if self.eat("-") {
            self.skip_ws();
            -self.integer()?
        } else {
            0
        };

        if a.abs() > MAX_INDEX || b.abs() > MAX_INDEX {
            return Err(self.error(
                CompileErrorKind::InvalidIndex(format!(
                    "formula coefficients must be at most {} in magnitude",
                    MAX_INDEX
                )),
                self.span_from(start),
            ));
        }

        Ok(IndexPredicate::Formula { a, b })
    }

    fn segment(&mut self, combinator: Option<RawCombinator>) -> Result<RawSegment, CompileError> {
        let start = self.pos;
        let target = self.eat("$");

        let mut has_name = false;
        let mut name = None;
        if self.eat("*") {
            has_name = true;
        } else if self.peek().is_some_and(Self::is_ident_start) {
            has_name = true;
            let mut full = self.ident();
            while self.peek() == Some('.') && self.peek_second().is_some_and(Self::is_ident_start)
            {
                self.bump();
                full.push('.');
                full.push_str(&self.ident());
            }
            name = Some(full);
        }

        let mut brackets = Vec::new();
        while self.peek() == Some('[') {
            self.bump();
            self.skip_ws();
            brackets.push(self.expr()?);
            self.skip_ws();
            self.expect(']', "']'")?;
        }

        if !has_name && brackets.is_empty() {
            let span = match self.peek() {
                Some(c) => Span::new(start, self.pos + c.len_utf8()),
                None => Span::new(start, self.pos),
            };
            return Err(self.error(CompileErrorKind::EmptySegment, span));
        }

        Ok(RawSegment {
            combinator,
            name,
            brackets,
            target,
            span: self.span_from(start),
        })
    }

    // ------------------------------------------------------------------
    // expression level
    // ------------------------------------------------------------------

    fn expr(&mut self) -> Result<Expr, CompileError> {
        self.or()
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let span = left.span.to(right.span);
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.and()?;
        loop {
            self.skip_ws();
            if !self.eat("||") {
                return Ok(left);
            }
            let right = self.and()?;
            left = Self::binary(BinaryOp::Logic(LogicOp::Or), left, right);
        }
    }

    fn and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.comparison()?;
        loop {
            self.skip_ws();
            if !self.eat("&&") {
                return Ok(left);
            }
            let right = self.comparison()?;
            left = Self::binary(BinaryOp::Logic(LogicOp::And), left, right);
        }
    }

    fn comparison(&mut self) -> Result<Expr, CompileError> {
        let left = self.additive()?;
        self.skip_ws();

        let Some(symbol) = COMPARE_OPS.iter().find(|op| self.rest().starts_with(**op)) else {
            return Ok(left);
        };
        self.pos += symbol.len();
        let op = CompareOp::parse(symbol).ok_or_else(|| self.unexpected_here("operator"))?;

        let right = self.additive()?;
        Ok(Self::binary(BinaryOp::Compare(op), left, right))
    }

    fn additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.multiplicative()?;
        loop {
            self.skip_ws();
            let op = match self.peek() {
                Some('+') => ArithOp::Add,
                Some('-') => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.multiplicative()?;
            left = Self::binary(BinaryOp::Arith(op), left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.unary()?;
        loop {
            self.skip_ws();
            let op = match (self.peek(), self.peek_second()) {
                // `*=` is the contains operator, not multiplication
                (Some('*'), Some('=')) => return Ok(left),
                (Some('*'), _) => ArithOp::Mul,
                (Some('/'), _) => ArithOp::Div,
                (Some('%'), _) => ArithOp::Rem,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.unary()?;
            left = Self::binary(BinaryOp::Arith(op), left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        self.skip_ws();
        let start = self.pos;
        let op = match self.peek() {
            Some('!') => UnaryOp::Not,
            Some('-') => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.bump();
        let operand = self.unary()?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            Span::new(start, self.pos),
        ))
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        while self.peek() == Some('.') && self.peek_second().is_some_and(Self::is_ident_start) {
            self.bump();
            let name_start = self.pos;
            let name = self.ident();
            let name_span = self.span_from(name_start);

            expr = if self.peek() == Some('(') {
                let args = self.arguments()?;
                let span = Span::new(expr.span.start, self.pos);
                Expr::new(
                    ExprKind::Call {
                        receiver: Some(Box::new(expr)),
                        name,
                        name_span,
                        args,
                    },
                    span,
                )
            } else {
                let span = Span::new(expr.span.start, self.pos);
                Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        name,
                        name_span,
                    },
                    span,
                )
            };
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect('(', "'('")?;
        let mut args = Vec::new();
        self.skip_ws();
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            self.skip_ws();
            if self.eat(",") {
                continue;
            }
            self.expect(')', "',' or ')'")?;
            return Ok(args);
        }
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        self.skip_ws();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Err(self.unexpected_here("expression"));
        };

        match c {
            '"' | '\'' | '`' => {
                let s = self.string(c)?;
                Ok(Expr::new(
                    ExprKind::Literal(Literal::Text(s)),
                    self.span_from(start),
                ))
            }
            c if c.is_ascii_digit() => {
                let n = self.integer()?;
                Ok(Expr::new(
                    ExprKind::Literal(Literal::Int(n)),
                    self.span_from(start),
                ))
            }
            '(' => {
                self.bump();
                let inner = self.expr()?;
                self.skip_ws();
                self.expect(')', "')'")?;
                Ok(Expr::new(inner.kind, self.span_from(start)))
            }
            c if Self::is_ident_start(c) => {
                let name = self.ident();
                let span = self.span_from(start);
                let literal = match name.as_str() {
                    "true" => Some(Literal::Bool(true)),
                    "false" => Some(Literal::Bool(false)),
                    "null" => Some(Literal::Null),
                    _ => None,
                };
                if let Some(lit) = literal {
                    return Ok(Expr::new(ExprKind::Literal(lit), span));
                }
                if self.peek() == Some('(') {
                    let args = self.arguments()?;
                    return Ok(Expr::new(
                        ExprKind::Call {
                            receiver: None,
                            name,
                            name_span: span,
                            args,
                        },
                        self.span_from(start),
                    ));
                }
                Ok(Expr::new(ExprKind::Ident(name), span))
            }
            c => Err(self.unexpected(c, "expression")),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, CompileError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();

        loop {
            let Some(c) = self.bump() else {
                return Err(self.error(
                    CompileErrorKind::UnterminatedString,
                    self.span_from(start),
                ));
            };
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }

            let escape_start = self.pos - 1;
            let Some(e) = self.bump() else {
                return Err(self.error(
                    CompileErrorKind::UnterminatedString,
                    self.span_from(start),
                ));
            };
            match e {
                '\\' | '"' | '\'' | '`' => out.push(e),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'u' => {
                    let hex_start = self.pos;
                    for _ in 0..4 {
                        if !self.peek().is_some_and(|h| h.is_ascii_hexdigit()) {
                            return Err(self.error(
                                CompileErrorKind::InvalidEscape('u'),
                                self.span_from(escape_start),
                            ));
                        }
                        self.bump();
                    }
                    let code = u32::from_str_radix(&self.src[hex_start..self.pos], 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| {
                            self.error(
                                CompileErrorKind::InvalidEscape('u'),
                                self.span_from(escape_start),
                            )
                        })?;
                    out.push(code);
                }
                other => {
                    return Err(self.error(
                        CompileErrorKind::InvalidEscape(other),
                        self.span_from(escape_start),
                    ))
                }
            }
        }
    }
}
