//! Inline expression evaluation
//!
//! Author-facing expressions (`{gold + 1}`, `{colors has green}`,
//! `{visited_cellar && mood != calm}`) are tokenized, parsed with
//! precedence climbing, and evaluated directly against session state.
//! There is no host-language code synthesis: the sandbox is this small
//! AST interpreter, which keeps evaluation deterministic and
//! side-effect-free apart from the RNG builtins.
//!
//! # Name resolution
//!
//! Bare identifiers resolve in order: temp → variables → constants →
//! list item / list name → visit count for the address. Unknown names
//! are nil. Dotted paths resolve as `list.item` first, then as a visit
//! address.

use super::builtins;
use super::engine::resolve_address;
use super::errors::RuntimeError;
use super::lists::{self, ListOrdering};
use super::HostFn;
use crate::parser::ast::{Story, IMPLICIT};
use crate::state::value::{ListValue, Value};
use crate::state::Visits;
use rand::rngs::SmallRng;
use rustc_hash::FxHashMap;

/// Everything an expression may read, plus the RNG the random builtins
/// may advance. Borrowed from the session for the duration of one
/// evaluation.
pub(crate) struct EvalCtx<'a> {
    pub story: &'a Story,
    pub temp: &'a FxHashMap<String, Value>,
    pub variables: &'a FxHashMap<String, Value>,
    pub constants: &'a FxHashMap<String, Value>,
    pub visits: &'a Visits,
    pub knot: &'a str,
    pub stitch: &'a str,
    pub functions: &'a FxHashMap<String, HostFn>,
    pub rng: &'a mut SmallRng,
}

/// Evaluate `src` to a value. Failures carry the offending source
/// expression.
pub(crate) fn evaluate(src: &str, ctx: &mut EvalCtx) -> Result<Value, RuntimeError> {
    eval_str(src, ctx).map_err(|reason| RuntimeError::Evaluation {
        expr: src.to_string(),
        reason,
    })
}

/// Evaluate `src` as a condition: evaluation failures count as false.
pub(crate) fn truthy(src: &str, ctx: &mut EvalCtx) -> bool {
    match eval_str(src, ctx) {
        Ok(v) => v.is_truthy(),
        Err(reason) => {
            tracing::debug!(expr = src, %reason, "condition failed to evaluate");
            false
        }
    }
}

fn eval_str(src: &str, ctx: &mut EvalCtx) -> Result<Value, String> {
    let tokens = tokenize(src)?;
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    parser.expect_end()?;
    eval(&expr, ctx)
}

// ===== Tokens =====

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Nil,
    And,
    Or,
    Not,
    Has,
    Hasnt,
    Quest,
    NotQuest,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Dot,
    Eof,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' => i += 1,
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    // A dot only continues the number when a digit follows;
                    // otherwise it is a path separator.
                    if bytes[i] == b'.'
                        && !bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit())
                    {
                        break;
                    }
                    i += 1;
                }
                let text = &src[start..i];
                let n: f64 = text
                    .parse()
                    .map_err(|_| format!("bad number literal `{text}`"))?;
                tokens.push(Token::Number(n));
            }
            b'"' | b'\'' => {
                let quote = b;
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(src[start..i].to_string()));
                i += 1;
            }
            b'+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            b'-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            b'*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            b'/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            b'%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            b'^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            b'(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            b'?' => {
                tokens.push(Token::Quest);
                i += 1;
            }
            b'=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err("single `=` is not an operator (use `==`)".to_string());
                }
            }
            b'!' => match bytes.get(i + 1) {
                Some(b'=') => {
                    tokens.push(Token::NotEq);
                    i += 2;
                }
                Some(b'?') => {
                    tokens.push(Token::NotQuest);
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Not);
                    i += 1;
                }
            },
            b'&' if bytes.get(i + 1) == Some(&b'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            b'|' if bytes.get(i + 1) == Some(&b'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            b'<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(match &src[start..i] {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    "nil" => Token::Nil,
                    "has" => Token::Has,
                    "hasnt" => Token::Hasnt,
                    word => Token::Ident(word.to_string()),
                });
            }
            other => {
                return Err(format!("unexpected character `{}`", other as char));
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

// ===== AST =====

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
    Ident(String),
    Path(Vec<String>),
    /// `(a, b.c, …)` — union of item references.
    ListLit(Vec<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Intersect,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Has,
    Hasnt,
}

// ===== Parser =====

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), String> {
        if *self.peek() == Token::Eof {
            Ok(())
        } else {
            Err(format!("unexpected token {:?}", self.peek()))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.match_token(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_equality()?;
        while self.match_token(&Token::And) {
            let right = self.parse_equality()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::Ne,
                Token::Has | Token::Quest => BinOp::Has,
                Token::Hasnt | Token::NotQuest => BinOp::Hasnt,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                Token::Caret => BinOp::Intersect,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.match_token(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        if self.match_token(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Nil => Ok(Expr::Nil),
            Token::Ident(name) => {
                if *self.peek() == Token::LParen {
                    self.advance();
                    let args = self.parse_args()?;
                    return Ok(Expr::Call(name, args));
                }
                let mut parts = vec![name];
                while *self.peek() == Token::Dot {
                    self.advance();
                    match self.advance() {
                        Token::Ident(part) => parts.push(part),
                        other => return Err(format!("expected name after `.`, got {other:?}")),
                    }
                }
                if parts.len() == 1 {
                    Ok(Expr::Ident(parts.remove(0)))
                } else {
                    Ok(Expr::Path(parts))
                }
            }
            Token::LParen => {
                let mut elems = vec![self.parse_or()?];
                while self.match_token(&Token::Comma) {
                    elems.push(self.parse_or()?);
                }
                if !self.match_token(&Token::RParen) {
                    return Err("expected `)`".to_string());
                }
                if elems.len() == 1 {
                    Ok(elems.remove(0))
                } else {
                    Ok(Expr::ListLit(elems))
                }
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        if self.match_token(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            if self.match_token(&Token::Comma) {
                continue;
            }
            if self.match_token(&Token::RParen) {
                return Ok(args);
            }
            return Err("expected `,` or `)` in argument list".to_string());
        }
    }
}

// ===== Evaluation =====

fn eval(expr: &Expr, ctx: &mut EvalCtx) -> Result<Value, String> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Nil => Ok(Value::Nil),
        Expr::Ident(name) => Ok(resolve_ident(name, ctx)),
        Expr::Path(parts) => Ok(resolve_path(parts, ctx)),
        Expr::ListLit(elems) => {
            let mut out = ListValue::new();
            for elem in elems {
                let v = eval(elem, ctx)?;
                match coerce_list(&v, ctx.story) {
                    Some(l) => out = out.union(&l),
                    None => {
                        return Err(format!(
                            "list literal element is {}, not a list item",
                            v.type_name()
                        ));
                    }
                }
            }
            Ok(Value::List(out))
        }
        Expr::Call(name, args) => {
            let mut vals = Vec::with_capacity(args.len());
            for arg in args {
                vals.push(eval(arg, ctx)?);
            }
            call(name, &vals, ctx)
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, ctx)?;
            match op {
                UnOp::Neg => v
                    .as_number()
                    .map(|n| Value::Number(-n))
                    .ok_or_else(|| format!("cannot negate {}", v.type_name())),
                UnOp::Not => Ok(Value::Bool(!v.is_truthy())),
            }
        }
        Expr::Binary(BinOp::And, l, r) => {
            let lv = eval(l, ctx)?;
            if !lv.is_truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(r, ctx)?.is_truthy()))
        }
        Expr::Binary(BinOp::Or, l, r) => {
            let lv = eval(l, ctx)?;
            if lv.is_truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(r, ctx)?.is_truthy()))
        }
        Expr::Binary(op, l, r) => {
            let lv = eval(l, ctx)?;
            let rv = eval(r, ctx)?;
            eval_binary(*op, &lv, &rv, ctx)
        }
    }
}

fn resolve_ident(name: &str, ctx: &EvalCtx) -> Value {
    if let Some(v) = ctx.temp.get(name) {
        return v.clone();
    }
    if let Some(v) = ctx.variables.get(name) {
        return v.clone();
    }
    if let Some(v) = ctx.constants.get(name) {
        return v.clone();
    }
    if let Some((def, _)) = ctx.story.find_item(name) {
        return Value::List(ListValue::single(&def.name, name));
    }
    if let Some(def) = ctx.story.list(name) {
        let mut all = ListValue::new();
        for item in &def.items {
            all.insert(name, item);
        }
        return Value::List(all);
    }
    visit_count(&[name.to_string()], ctx)
}

fn resolve_path(parts: &[String], ctx: &EvalCtx) -> Value {
    if let [list, item] = parts {
        if let Some(def) = ctx.story.list(list) {
            if def.ordinal(item).is_some() {
                return Value::List(ListValue::single(list, item));
            }
        }
    }
    visit_count(parts, ctx)
}

fn visit_count(parts: &[String], ctx: &EvalCtx) -> Value {
    let Some(addr) = resolve_address(ctx.story, parts, ctx.knot, ctx.stitch) else {
        return Value::Nil;
    };
    let count = match &addr.label {
        Some(label) => ctx.visits.label_count(&addr.knot, &addr.stitch, label),
        None if addr.stitch == IMPLICIT => ctx.visits.knot_count(&addr.knot),
        None => ctx.visits.stitch_count(&addr.knot, &addr.stitch),
    };
    Value::Number(count as f64)
}

fn call(name: &str, args: &[Value], ctx: &mut EvalCtx) -> Result<Value, String> {
    if let Some(f) = ctx.functions.get(name) {
        return Ok(f(args));
    }
    if let Some(result) = builtins::call(name, args, ctx) {
        return result;
    }
    // `colors(2)` — the Nth item of a declared list.
    if let Some(def) = ctx.story.list(name) {
        if let [arg] = args {
            let n = arg
                .as_number()
                .ok_or_else(|| format!("list index must be a number, got {}", arg.type_name()))?;
            let item = (n >= 1.0)
                .then(|| def.items.get(n as usize - 1))
                .flatten();
            return Ok(match item {
                Some(item) => Value::List(ListValue::single(name, item)),
                None => Value::List(ListValue::new()),
            });
        }
    }
    Err(format!("unknown function `{name}`"))
}

/// Scalar ⇄ list coercion: a string naming a declared item becomes a
/// single-element list.
fn coerce_list(v: &Value, story: &Story) -> Option<ListValue> {
    match v {
        Value::List(l) => Some(l.clone()),
        Value::Str(s) => story
            .find_item(s)
            .map(|(def, _)| ListValue::single(&def.name, s)),
        _ => None,
    }
}

fn value_eq(l: &Value, r: &Value) -> bool {
    if let (Some(a), Some(b)) = (l.as_number(), r.as_number()) {
        return a == b;
    }
    // List equality is item-wise; empty origin entries do not count.
    if let (Value::List(a), Value::List(b)) = (l, r) {
        return a.same_items(b);
    }
    l == r
}

fn eval_binary(op: BinOp, l: &Value, r: &Value, ctx: &mut EvalCtx) -> Result<Value, String> {
    match op {
        BinOp::Add => match (l, r) {
            (Value::List(a), _) => {
                let b = coerce_list(r, ctx.story)
                    .ok_or_else(|| format!("cannot add {} to a list", r.type_name()))?;
                Ok(Value::List(a.union(&b)))
            }
            (_, Value::List(b)) => {
                let a = coerce_list(l, ctx.story)
                    .ok_or_else(|| format!("cannot add a list to {}", l.type_name()))?;
                Ok(Value::List(a.union(b)))
            }
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!(
                "{}{}",
                lists::render(l, ctx.story),
                lists::render(r, ctx.story)
            ))),
            _ => numeric(l, r, "+", |a, b| a + b),
        },
        BinOp::Sub => match (l, r) {
            (Value::List(a), _) => {
                let b = coerce_list(r, ctx.story)
                    .ok_or_else(|| format!("cannot subtract {} from a list", r.type_name()))?;
                Ok(Value::List(a.difference(&b)))
            }
            _ => numeric(l, r, "-", |a, b| a - b),
        },
        BinOp::Mul => numeric(l, r, "*", |a, b| a * b),
        BinOp::Div => {
            if r.as_number() == Some(0.0) {
                return Err("division by zero".to_string());
            }
            numeric(l, r, "/", |a, b| a / b)
        }
        BinOp::Mod => {
            if r.as_number() == Some(0.0) {
                return Err("modulo by zero".to_string());
            }
            numeric(l, r, "%", |a, b| a % b)
        }
        BinOp::Intersect => match (coerce_list(l, ctx.story), coerce_list(r, ctx.story)) {
            (Some(a), Some(b)) => Ok(Value::List(a.intersect(&b))),
            _ => Err(format!(
                "`^` needs list operands, got {} and {}",
                l.type_name(),
                r.type_name()
            )),
        },
        BinOp::Eq => Ok(Value::Bool(value_eq(l, r))),
        BinOp::Ne => Ok(Value::Bool(!value_eq(l, r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, l, r, ctx),
        BinOp::Has => contains(l, r, ctx).map(Value::Bool),
        BinOp::Hasnt => contains(l, r, ctx).map(|b| Value::Bool(!b)),
        BinOp::And | BinOp::Or => unreachable!("short-circuit ops handled in eval"),
    }
}

fn numeric(l: &Value, r: &Value, op: &str, f: impl Fn(f64, f64) -> f64) -> Result<Value, String> {
    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => Ok(Value::Number(f(a, b))),
        _ => Err(format!(
            "`{op}` needs numeric operands, got {} and {}",
            l.type_name(),
            r.type_name()
        )),
    }
}

fn compare(op: BinOp, l: &Value, r: &Value, ctx: &EvalCtx) -> Result<Value, String> {
    if matches!(l, Value::List(_)) || matches!(r, Value::List(_)) {
        let (Some(a), Some(b)) = (coerce_list(l, ctx.story), coerce_list(r, ctx.story)) else {
            return Err(format!(
                "cannot order {} against {}",
                l.type_name(),
                r.type_name()
            ));
        };
        let ord = match op {
            BinOp::Lt => ListOrdering::Less,
            BinOp::Le => ListOrdering::LessEq,
            BinOp::Gt => ListOrdering::Greater,
            _ => ListOrdering::GreaterEq,
        };
        return Ok(Value::Bool(lists::compare(ord, &a, &b, ctx.story)));
    }

    if let (Value::Str(a), Value::Str(b)) = (l, r) {
        let result = match op {
            BinOp::Lt => a < b,
            BinOp::Le => a <= b,
            BinOp::Gt => a > b,
            _ => a >= b,
        };
        return Ok(Value::Bool(result));
    }

    match (l.as_number(), r.as_number()) {
        (Some(a), Some(b)) => {
            let result = match op {
                BinOp::Lt => a < b,
                BinOp::Le => a <= b,
                BinOp::Gt => a > b,
                _ => a >= b,
            };
            Ok(Value::Bool(result))
        }
        _ => Err(format!(
            "cannot order {} against {}",
            l.type_name(),
            r.type_name()
        )),
    }
}

/// `has` / `?`: subset test on lists, substring test on strings.
fn contains(l: &Value, r: &Value, ctx: &EvalCtx) -> Result<bool, String> {
    match l {
        Value::List(a) => {
            let b = coerce_list(r, ctx.story)
                .ok_or_else(|| format!("`has` needs a list item, got {}", r.type_name()))?;
            Ok(a.contains_all(&b))
        }
        Value::Str(a) => Ok(a.contains(&lists::render(r, ctx.story))),
        _ => Err(format!("`has` needs a list or string, got {}", l.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::ListDef;
    use rand::SeedableRng;

    struct Fixture {
        story: Story,
        temp: FxHashMap<String, Value>,
        variables: FxHashMap<String, Value>,
        constants: FxHashMap<String, Value>,
        visits: Visits,
        functions: FxHashMap<String, HostFn>,
        rng: SmallRng,
    }

    impl Fixture {
        fn new() -> Self {
            let mut story = Story::default();
            story.lists.push(ListDef {
                name: "colors".into(),
                items: vec!["red".into(), "green".into(), "blue".into()],
                initial: vec!["green".into()],
            });
            Fixture {
                story,
                temp: FxHashMap::default(),
                variables: FxHashMap::default(),
                constants: FxHashMap::default(),
                visits: Visits::default(),
                functions: FxHashMap::default(),
                rng: SmallRng::seed_from_u64(7),
            }
        }

        fn eval(&mut self, src: &str) -> Result<Value, RuntimeError> {
            let mut ctx = EvalCtx {
                story: &self.story,
                temp: &self.temp,
                variables: &self.variables,
                constants: &self.constants,
                visits: &self.visits,
                knot: IMPLICIT,
                stitch: IMPLICIT,
                functions: &self.functions,
                rng: &mut self.rng,
            };
            evaluate(src, &mut ctx)
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        let mut f = Fixture::new();
        assert_eq!(f.eval("1 + 2 * 3").unwrap(), Value::Number(7.0));
        assert_eq!(f.eval("(1 + 2) * 3").unwrap(), Value::Number(9.0));
        assert_eq!(f.eval("10 % 3").unwrap(), Value::Number(1.0));
        assert_eq!(f.eval("-2 + 5").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_logic_and_comparison() {
        let mut f = Fixture::new();
        f.variables.insert("x".into(), Value::Number(2.0));
        assert_eq!(f.eval("x == 2 && x != 3").unwrap(), Value::Bool(true));
        assert_eq!(f.eval("x > 5 || x <= 2").unwrap(), Value::Bool(true));
        assert_eq!(f.eval("not (x == 2)").unwrap(), Value::Bool(false));
        assert_eq!(f.eval("x == 2 and x < 10 or false").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unknown_name_is_nil() {
        let mut f = Fixture::new();
        assert_eq!(f.eval("something_undeclared").unwrap(), Value::Nil);
    }

    #[test]
    fn test_lookup_order_temp_shadows_variable() {
        let mut f = Fixture::new();
        f.variables.insert("x".into(), Value::Number(1.0));
        f.temp.insert("x".into(), Value::Number(9.0));
        assert_eq!(f.eval("x").unwrap(), Value::Number(9.0));
    }

    #[test]
    fn test_list_item_resolution() {
        let mut f = Fixture::new();
        let v = f.eval("green").unwrap();
        assert_eq!(v, Value::List(ListValue::single("colors", "green")));
    }

    #[test]
    fn test_list_membership_and_algebra() {
        let mut f = Fixture::new();
        let mut enabled = ListValue::new();
        enabled.insert("colors", "red");
        enabled.insert("colors", "green");
        f.variables.insert("colors".into(), Value::List(enabled));

        assert_eq!(f.eval("colors has green").unwrap(), Value::Bool(true));
        assert_eq!(f.eval("colors hasnt blue").unwrap(), Value::Bool(true));
        assert_eq!(f.eval("colors ? green").unwrap(), Value::Bool(true));
        assert_eq!(
            f.eval("colors - green has green").unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            f.eval("(red, blue) ^ colors").unwrap(),
            Value::List(ListValue::single("colors", "red"))
        );
    }

    #[test]
    fn test_list_nth_item_call() {
        let mut f = Fixture::new();
        assert_eq!(
            f.eval("colors(2)").unwrap(),
            Value::List(ListValue::single("colors", "green"))
        );
        assert_eq!(
            f.eval("colors(9)").unwrap(),
            Value::List(ListValue::new())
        );
    }

    #[test]
    fn test_string_operations() {
        let mut f = Fixture::new();
        assert_eq!(
            f.eval("\"north\" + \"west\"").unwrap(),
            Value::Str("northwest".into())
        );
        assert_eq!(f.eval("\"northwest\" ? \"west\"").unwrap(), Value::Bool(true));
        assert_eq!(f.eval("\"ab\" + 1").unwrap(), Value::Str("ab1".into()));
    }

    #[test]
    fn test_host_function() {
        let mut f = Fixture::new();
        f.functions.insert(
            "double".into(),
            Box::new(|args: &[Value]| {
                Value::Number(args[0].as_number().unwrap_or(0.0) * 2.0)
            }),
        );
        assert_eq!(f.eval("double(21)").unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_visit_count_resolution() {
        let mut f = Fixture::new();
        f.story.knots.entry("cave".into()).or_default();
        f.visits.enter("cave", IMPLICIT, true);
        f.visits.enter("cave", IMPLICIT, true);
        assert_eq!(f.eval("cave").unwrap(), Value::Number(2.0));
        assert_eq!(f.eval("cave == 2").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_division_by_zero_errors() {
        let mut f = Fixture::new();
        let err = f.eval("1 / 0").unwrap_err();
        assert!(matches!(err, RuntimeError::Evaluation { .. }));
    }

    #[test]
    fn test_error_carries_source() {
        let mut f = Fixture::new();
        match f.eval("mystery_fn(1)").unwrap_err() {
            RuntimeError::Evaluation { expr, .. } => assert_eq!(expr, "mystery_fn(1)"),
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }
}
