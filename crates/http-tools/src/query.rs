//! A small jq-compatible query language for reshaping JSON responses.
//!
//! Supported: `.`, `.a`, `."a b"`, `.[i]`, `.[a:b]`, `.[]`, `?`, `|`, `,`, `//`, `and`, `or`,
//! comparison and arithmetic operators, array/object construction, literals,
//! `if ... then ... elif ... else ... end`, and a handful of builtins (see [`call_builtin`]).
//!
//! Programs are parsed once and evaluated many times; evaluation is a pure function of the input.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("query syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("query error: {0}")]
    Runtime(String),
}

fn runtime(msg: impl Into<String>) -> ExprError {
    ExprError::Runtime(msg.into())
}

/// A compiled query.
#[derive(Debug, Clone)]
pub struct QueryProgram {
    source: String,
    ast: Ast,
}

impl QueryProgram {
    /// Parse a query.
    ///
    /// # Errors
    ///
    /// Returns a syntax error for empty or malformed input.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let tokens = lex(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Syntax {
                offset: 0,
                message: "empty query".to_string(),
            });
        }
        let mut parser = Parser { tokens, pos: 0 };
        let ast = parser.parse_pipe(true)?;
        if let Some(tok) = parser.tokens.get(parser.pos) {
            return Err(ExprError::Syntax {
                offset: tok.offset,
                message: format!("unexpected token {:?}", tok.kind),
            });
        }
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the query, returning every emitted value in order.
    ///
    /// # Errors
    ///
    /// Returns the first runtime error raised outside a `?`/`//` guard.
    pub fn run(&self, input: &Value) -> Result<Vec<Value>, ExprError> {
        eval(&self.ast, input)
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Dot,
    Field(String),
    Ident(String),
    Num(f64),
    Str(String),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Alt,
    Op(BinOp),
}

#[derive(Debug, Clone)]
struct Token {
    kind: Tok,
    offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn lex(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;

    let syntax = |offset: usize, message: &str| ExprError::Syntax {
        offset,
        message: message.to_string(),
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let kind = match c {
            '.' => {
                if next.is_some_and(is_ident_start) {
                    let mut j = i + 1;
                    let mut name = String::new();
                    while j < chars.len() && is_ident_char(chars[j].1) {
                        name.push(chars[j].1);
                        j += 1;
                    }
                    i = j;
                    out.push(Token {
                        kind: Tok::Field(name),
                        offset,
                    });
                    continue;
                }
                if next == Some('.') {
                    return Err(syntax(offset, "recursive descent '..' is not supported"));
                }
                Tok::Dot
            }
            '"' => {
                let (s, end) = lex_string(&chars, i)?;
                i = end;
                out.push(Token {
                    kind: Tok::Str(s),
                    offset,
                });
                continue;
            }
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            ',' => Tok::Comma,
            ':' => Tok::Colon,
            ';' => Tok::Semicolon,
            '?' => Tok::Question,
            '|' => Tok::Pipe,
            '+' => Tok::Op(BinOp::Add),
            '-' => Tok::Op(BinOp::Sub),
            '*' => Tok::Op(BinOp::Mul),
            '%' => Tok::Op(BinOp::Rem),
            '/' => {
                if next == Some('/') {
                    i += 2;
                    out.push(Token {
                        kind: Tok::Alt,
                        offset,
                    });
                    continue;
                }
                Tok::Op(BinOp::Div)
            }
            '=' if next == Some('=') => {
                i += 2;
                out.push(Token {
                    kind: Tok::Op(BinOp::Eq),
                    offset,
                });
                continue;
            }
            '!' if next == Some('=') => {
                i += 2;
                out.push(Token {
                    kind: Tok::Op(BinOp::Ne),
                    offset,
                });
                continue;
            }
            '<' | '>' => {
                let (op, width) = match (c, next) {
                    ('<', Some('=')) => (BinOp::Le, 2),
                    ('<', _) => (BinOp::Lt, 1),
                    ('>', Some('=')) => (BinOp::Ge, 2),
                    _ => (BinOp::Gt, 1),
                };
                i += width;
                out.push(Token {
                    kind: Tok::Op(op),
                    offset,
                });
                continue;
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                let mut text = String::new();
                while j < chars.len()
                    && (chars[j].1.is_ascii_digit()
                        || chars[j].1 == '.'
                        || chars[j].1 == 'e'
                        || chars[j].1 == 'E'
                        || ((chars[j].1 == '+' || chars[j].1 == '-')
                            && matches!(text.chars().last(), Some('e' | 'E'))))
                {
                    text.push(chars[j].1);
                    j += 1;
                }
                let n: f64 = text
                    .parse()
                    .map_err(|_| syntax(offset, &format!("invalid number '{text}'")))?;
                i = j;
                out.push(Token {
                    kind: Tok::Num(n),
                    offset,
                });
                continue;
            }
            c if is_ident_start(c) => {
                let mut j = i;
                let mut name = String::new();
                while j < chars.len() && is_ident_char(chars[j].1) {
                    name.push(chars[j].1);
                    j += 1;
                }
                i = j;
                out.push(Token {
                    kind: Tok::Ident(name),
                    offset,
                });
                continue;
            }
            '$' => return Err(syntax(offset, "variables are not supported")),
            other => return Err(syntax(offset, &format!("unexpected character '{other}'"))),
        };
        out.push(Token { kind, offset });
        i += 1;
    }

    Ok(out)
}

fn lex_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), ExprError> {
    let offset = chars[start].0;
    let mut s = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i].1;
        match c {
            '"' => return Ok((s, i + 1)),
            '\\' => {
                let Some(&(_, esc)) = chars.get(i + 1) else {
                    break;
                };
                match esc {
                    '"' => s.push('"'),
                    '\\' => s.push('\\'),
                    '/' => s.push('/'),
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    'b' => s.push('\u{8}'),
                    'f' => s.push('\u{c}'),
                    'u' => {
                        let hex: String = chars.iter().skip(i + 2).take(4).map(|(_, c)| *c).collect();
                        let code = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
                        let Some(ch) = code else {
                            return Err(ExprError::Syntax {
                                offset,
                                message: format!("invalid unicode escape '\\u{hex}'"),
                            });
                        };
                        s.push(ch);
                        i += 4;
                    }
                    '(' => {
                        return Err(ExprError::Syntax {
                            offset,
                            message: "string interpolation is not supported".to_string(),
                        });
                    }
                    other => {
                        return Err(ExprError::Syntax {
                            offset,
                            message: format!("invalid escape '\\{other}'"),
                        });
                    }
                }
                i += 2;
            }
            _ => {
                s.push(c);
                i += 1;
            }
        }
    }
    Err(ExprError::Syntax {
        offset,
        message: "unterminated string".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Ast {
    Identity,
    Literal(Value),
    Index(Box<Ast>, Box<Ast>),
    Slice(Box<Ast>, Option<Box<Ast>>, Option<Box<Ast>>),
    Iterate(Box<Ast>),
    Try(Box<Ast>),
    Pipe(Box<Ast>, Box<Ast>),
    Comma(Box<Ast>, Box<Ast>),
    Alt(Box<Ast>, Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
    Neg(Box<Ast>),
    Array(Option<Box<Ast>>),
    Object(Vec<(Ast, Ast)>),
    If {
        branches: Vec<(Ast, Ast)>,
        otherwise: Option<Box<Ast>>,
    },
    Call(String, Vec<Ast>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, n: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.offset)
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|t| t.kind.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Tok) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Tok, what: &str) -> Result<(), ExprError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Ident(name)) if name == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ExprError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn parse_pipe(&mut self, allow_comma: bool) -> Result<Ast, ExprError> {
        let lhs = if allow_comma {
            self.parse_comma()?
        } else {
            self.parse_alt()?
        };
        if self.eat(&Tok::Pipe) {
            let rhs = self.parse_pipe(allow_comma)?;
            return Ok(Ast::Pipe(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_comma(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_alt()?;
        while self.eat(&Tok::Comma) {
            let rhs = self.parse_alt()?;
            lhs = Ast::Comma(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_alt(&mut self) -> Result<Ast, ExprError> {
        let lhs = self.parse_or()?;
        if self.eat(&Tok::Alt) {
            let rhs = self.parse_alt()?;
            return Ok(Ast::Alt(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_comparison()?;
            lhs = Ast::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Ast, ExprError> {
        let lhs = self.parse_additive()?;
        if let Some(Tok::Op(
            op @ (BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge),
        )) = self.peek().cloned()
        {
            self.pos += 1;
            let rhs = self.parse_additive()?;
            return Ok(Ast::Binary(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        while let Some(Tok::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_unary()?;
        while let Some(Tok::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::Rem))) = self.peek().cloned()
        {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Ast::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Ast, ExprError> {
        if self.eat(&Tok::Op(BinOp::Sub)) {
            let inner = self.parse_postfix()?;
            return Ok(Ast::Neg(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Ast, ExprError> {
        let mut term = self.parse_primary()?;
        loop {
            match self.peek().cloned() {
                Some(Tok::Field(name)) => {
                    self.pos += 1;
                    term = Ast::Index(Box::new(term), Box::new(Ast::Literal(Value::String(name))));
                }
                Some(Tok::Dot) if matches!(self.peek_at(1), Some(Tok::Str(_))) => {
                    self.pos += 1;
                    if let Some(Tok::Str(name)) = self.bump() {
                        term =
                            Ast::Index(Box::new(term), Box::new(Ast::Literal(Value::String(name))));
                    }
                }
                Some(Tok::Dot) if matches!(self.peek_at(1), Some(Tok::LBracket)) => {
                    self.pos += 1;
                }
                Some(Tok::LBracket) => {
                    self.pos += 1;
                    term = self.parse_bracket_suffix(term)?;
                }
                Some(Tok::Question) => {
                    self.pos += 1;
                    term = Ast::Try(Box::new(term));
                }
                _ => return Ok(term),
            }
        }
    }

    fn parse_bracket_suffix(&mut self, target: Ast) -> Result<Ast, ExprError> {
        if self.eat(&Tok::RBracket) {
            return Ok(Ast::Iterate(Box::new(target)));
        }
        if self.eat(&Tok::Colon) {
            let to = self.parse_pipe(true)?;
            self.expect(&Tok::RBracket, "']'")?;
            return Ok(Ast::Slice(Box::new(target), None, Some(Box::new(to))));
        }
        let key = self.parse_pipe(true)?;
        if self.eat(&Tok::Colon) {
            let to = if self.peek() == Some(&Tok::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_pipe(true)?))
            };
            self.expect(&Tok::RBracket, "']'")?;
            return Ok(Ast::Slice(Box::new(target), Some(Box::new(key)), to));
        }
        self.expect(&Tok::RBracket, "']'")?;
        Ok(Ast::Index(Box::new(target), Box::new(key)))
    }

    fn parse_primary(&mut self) -> Result<Ast, ExprError> {
        let Some(tok) = self.bump() else {
            return Err(self.error("unexpected end of query"));
        };
        match tok {
            Tok::Dot => {
                if let Some(Tok::Str(name)) = self.peek().cloned() {
                    self.pos += 1;
                    return Ok(Ast::Index(
                        Box::new(Ast::Identity),
                        Box::new(Ast::Literal(Value::String(name))),
                    ));
                }
                Ok(Ast::Identity)
            }
            Tok::Field(name) => Ok(Ast::Index(
                Box::new(Ast::Identity),
                Box::new(Ast::Literal(Value::String(name))),
            )),
            Tok::Num(n) => Ok(Ast::Literal(number_value(n))),
            Tok::Str(s) => Ok(Ast::Literal(Value::String(s))),
            Tok::LParen => {
                let inner = self.parse_pipe(true)?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                if self.eat(&Tok::RBracket) {
                    return Ok(Ast::Array(None));
                }
                let inner = self.parse_pipe(true)?;
                self.expect(&Tok::RBracket, "']'")?;
                Ok(Ast::Array(Some(Box::new(inner))))
            }
            Tok::LBrace => self.parse_object(),
            Tok::Ident(name) => self.parse_ident(name),
            other => Err(ExprError::Syntax {
                offset: self.tokens.get(self.pos - 1).map_or(0, |t| t.offset),
                message: format!("unexpected token {other:?}"),
            }),
        }
    }

    fn parse_ident(&mut self, name: String) -> Result<Ast, ExprError> {
        match name.as_str() {
            "true" => return Ok(Ast::Literal(Value::Bool(true))),
            "false" => return Ok(Ast::Literal(Value::Bool(false))),
            "null" => return Ok(Ast::Literal(Value::Null)),
            "if" => return self.parse_if(),
            "then" | "elif" | "else" | "end" | "and" | "or" => {
                return Err(self.error(format!("unexpected keyword '{name}'")));
            }
            _ => {}
        }

        let mut args = Vec::new();
        if self.eat(&Tok::LParen) {
            loop {
                args.push(self.parse_pipe(true)?);
                if self.eat(&Tok::Semicolon) {
                    continue;
                }
                self.expect(&Tok::RParen, "')'")?;
                break;
            }
        }
        if !is_known_builtin(&name, args.len()) {
            return Err(self.error(format!("{name}/{} is not defined", args.len())));
        }
        Ok(Ast::Call(name, args))
    }

    fn parse_if(&mut self) -> Result<Ast, ExprError> {
        let mut branches = Vec::new();
        let cond = self.parse_pipe(true)?;
        self.expect_keyword("then")?;
        let body = self.parse_pipe(true)?;
        branches.push((cond, body));

        loop {
            if self.eat_keyword("elif") {
                let cond = self.parse_pipe(true)?;
                self.expect_keyword("then")?;
                let body = self.parse_pipe(true)?;
                branches.push((cond, body));
                continue;
            }
            if self.eat_keyword("else") {
                let otherwise = self.parse_pipe(true)?;
                self.expect_keyword("end")?;
                return Ok(Ast::If {
                    branches,
                    otherwise: Some(Box::new(otherwise)),
                });
            }
            self.expect_keyword("end")?;
            return Ok(Ast::If {
                branches,
                otherwise: None,
            });
        }
    }

    fn parse_object(&mut self) -> Result<Ast, ExprError> {
        let mut entries = Vec::new();
        if self.eat(&Tok::RBrace) {
            return Ok(Ast::Object(entries));
        }
        loop {
            let key = match self.bump() {
                Some(Tok::Ident(name)) => name,
                Some(Tok::Str(s)) => s,
                Some(Tok::LParen) => {
                    let key_expr = self.parse_pipe(true)?;
                    self.expect(&Tok::RParen, "')'")?;
                    self.expect(&Tok::Colon, "':'")?;
                    let value = self.parse_pipe(false)?;
                    entries.push((key_expr, value));
                    if self.eat(&Tok::Comma) {
                        continue;
                    }
                    self.expect(&Tok::RBrace, "'}'")?;
                    return Ok(Ast::Object(entries));
                }
                _ => return Err(self.error("expected object key")),
            };

            let value = if self.eat(&Tok::Colon) {
                self.parse_pipe(false)?
            } else {
                Ast::Index(
                    Box::new(Ast::Identity),
                    Box::new(Ast::Literal(Value::String(key.clone()))),
                )
            };
            entries.push((Ast::Literal(Value::String(key)), value));

            if self.eat(&Tok::Comma) {
                continue;
            }
            self.expect(&Tok::RBrace, "'}'")?;
            return Ok(Ast::Object(entries));
        }
    }
}

fn is_known_builtin(name: &str, arity: usize) -> bool {
    matches!(
        (name, arity),
        (
            "length" | "keys" | "values" | "first" | "last" | "add" | "sort" | "reverse"
                | "tostring" | "tonumber" | "type" | "not" | "empty",
            0
        ) | ("map" | "select" | "has" | "join", 1)
    )
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(ast: &Ast, input: &Value) -> Result<Vec<Value>, ExprError> {
    match ast {
        Ast::Identity => Ok(vec![input.clone()]),
        Ast::Literal(v) => Ok(vec![v.clone()]),
        Ast::Index(target, key) => {
            let mut out = Vec::new();
            for t in eval(target, input)? {
                for k in eval(key, input)? {
                    out.push(index_value(&t, &k)?);
                }
            }
            Ok(out)
        }
        Ast::Slice(target, from, to) => {
            let froms = match from {
                Some(f) => eval(f, input)?,
                None => vec![Value::Null],
            };
            let tos = match to {
                Some(t) => eval(t, input)?,
                None => vec![Value::Null],
            };
            let mut out = Vec::new();
            for t in eval(target, input)? {
                for to in &tos {
                    for from in &froms {
                        out.push(slice_value(&t, from, to)?);
                    }
                }
            }
            Ok(out)
        }
        Ast::Iterate(target) => {
            let mut out = Vec::new();
            for t in eval(target, input)? {
                match t {
                    Value::Array(items) => out.extend(items),
                    Value::Object(map) => out.extend(map.into_iter().map(|(_, v)| v)),
                    other => {
                        return Err(runtime(format!(
                            "Cannot iterate over {}",
                            type_name(&other)
                        )));
                    }
                }
            }
            Ok(out)
        }
        Ast::Try(inner) => Ok(eval(inner, input).unwrap_or_default()),
        Ast::Pipe(lhs, rhs) => {
            let mut out = Vec::new();
            for v in eval(lhs, input)? {
                out.extend(eval(rhs, &v)?);
            }
            Ok(out)
        }
        Ast::Comma(lhs, rhs) => {
            let mut out = eval(lhs, input)?;
            out.extend(eval(rhs, input)?);
            Ok(out)
        }
        Ast::Alt(lhs, rhs) => {
            let truthy: Vec<Value> = eval(lhs, input)
                .unwrap_or_default()
                .into_iter()
                .filter(is_truthy)
                .collect();
            if truthy.is_empty() {
                eval(rhs, input)
            } else {
                Ok(truthy)
            }
        }
        Ast::And(lhs, rhs) => {
            let mut out = Vec::new();
            for l in eval(lhs, input)? {
                if !is_truthy(&l) {
                    out.push(Value::Bool(false));
                    continue;
                }
                for r in eval(rhs, input)? {
                    out.push(Value::Bool(is_truthy(&r)));
                }
            }
            Ok(out)
        }
        Ast::Or(lhs, rhs) => {
            let mut out = Vec::new();
            for l in eval(lhs, input)? {
                if is_truthy(&l) {
                    out.push(Value::Bool(true));
                    continue;
                }
                for r in eval(rhs, input)? {
                    out.push(Value::Bool(is_truthy(&r)));
                }
            }
            Ok(out)
        }
        Ast::Binary(op, lhs, rhs) => {
            let rights = eval(rhs, input)?;
            let lefts = eval(lhs, input)?;
            let mut out = Vec::with_capacity(rights.len() * lefts.len());
            for r in &rights {
                for l in &lefts {
                    out.push(binary(*op, l, r)?);
                }
            }
            Ok(out)
        }
        Ast::Neg(inner) => eval(inner, input)?
            .into_iter()
            .map(|v| match v.as_f64() {
                Some(n) => Ok(number_value(-n)),
                None => Err(runtime(format!("{} cannot be negated", type_name(&v)))),
            })
            .collect(),
        Ast::Array(inner) => {
            let items = match inner {
                Some(inner) => eval(inner, input)?,
                None => Vec::new(),
            };
            Ok(vec![Value::Array(items)])
        }
        Ast::Object(entries) => {
            let mut partials: Vec<Map<String, Value>> = vec![Map::new()];
            for (key_ast, value_ast) in entries {
                let keys = eval(key_ast, input)?;
                let values = eval(value_ast, input)?;
                let mut next = Vec::new();
                for partial in &partials {
                    for k in &keys {
                        let Value::String(k) = k else {
                            return Err(runtime(format!(
                                "Object keys must be strings, got {}",
                                type_name(k)
                            )));
                        };
                        for v in &values {
                            let mut m = partial.clone();
                            m.insert(k.clone(), v.clone());
                            next.push(m);
                        }
                    }
                }
                partials = next;
            }
            Ok(partials.into_iter().map(Value::Object).collect())
        }
        Ast::If {
            branches,
            otherwise,
        } => eval_if(branches, otherwise.as_deref(), input),
        Ast::Call(name, args) => call_builtin(name, args, input),
    }
}

fn eval_if(
    branches: &[(Ast, Ast)],
    otherwise: Option<&Ast>,
    input: &Value,
) -> Result<Vec<Value>, ExprError> {
    let Some(((cond, body), rest)) = branches.split_first() else {
        return match otherwise {
            Some(e) => eval(e, input),
            None => Ok(vec![input.clone()]),
        };
    };
    let mut out = Vec::new();
    for c in eval(cond, input)? {
        if is_truthy(&c) {
            out.extend(eval(body, input)?);
        } else {
            out.extend(eval_if(rest, otherwise, input)?);
        }
    }
    Ok(out)
}

/// Evaluate a builtin call.
///
/// Zero-arity: `length keys values first last add sort reverse tostring tonumber type not empty`.
/// One-arity: `map(f) select(f) has(k) join(sep)`.
fn call_builtin(name: &str, args: &[Ast], input: &Value) -> Result<Vec<Value>, ExprError> {
    let one = |v: Value| Ok(vec![v]);
    match (name, args) {
        ("empty", []) => Ok(Vec::new()),
        ("not", []) => one(Value::Bool(!is_truthy(input))),
        ("type", []) => one(Value::String(type_name(input).to_string())),
        ("length", []) => one(match input {
            Value::Null => Value::from(0),
            Value::Bool(_) => return Err(runtime("boolean has no length")),
            Value::Number(n) => number_value(n.as_f64().unwrap_or(0.0).abs()),
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(a) => Value::from(a.len()),
            Value::Object(o) => Value::from(o.len()),
        }),
        ("keys", []) => match input {
            Value::Object(o) => {
                let mut keys: Vec<&String> = o.keys().collect();
                keys.sort();
                one(Value::Array(keys.into_iter().map(|k| Value::String(k.clone())).collect()))
            }
            Value::Array(a) => one(Value::Array((0..a.len()).map(Value::from).collect())),
            other => Err(runtime(format!("{} has no keys", type_name(other)))),
        },
        ("values", []) => {
            if input.is_null() {
                Ok(Vec::new())
            } else {
                one(input.clone())
            }
        }
        ("first", []) => one(index_value(input, &Value::from(0))?),
        ("last", []) => one(index_value(input, &Value::from(-1))?),
        ("add", []) => {
            let items: Vec<Value> = match input {
                Value::Array(a) => a.clone(),
                Value::Object(o) => o.values().cloned().collect(),
                Value::Null => Vec::new(),
                other => return Err(runtime(format!("Cannot add elements of {}", type_name(other)))),
            };
            let mut acc = Value::Null;
            for item in &items {
                acc = binary(BinOp::Add, &acc, item)?;
            }
            one(acc)
        }
        ("sort", []) => match input {
            Value::Array(a) => {
                let mut sorted = a.clone();
                sorted.sort_by(compare_values);
                one(Value::Array(sorted))
            }
            other => Err(runtime(format!("{} cannot be sorted", type_name(other)))),
        },
        ("reverse", []) => match input {
            Value::Array(a) => one(Value::Array(a.iter().rev().cloned().collect())),
            Value::String(s) => one(Value::String(s.chars().rev().collect())),
            Value::Null => one(Value::Array(Vec::new())),
            other => Err(runtime(format!("{} cannot be reversed", type_name(other)))),
        },
        ("tostring", []) => match input {
            Value::String(_) => one(input.clone()),
            other => one(Value::String(other.to_string())),
        },
        ("tonumber", []) => match input {
            Value::Number(_) => one(input.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(|n| vec![number_value(n)])
                .map_err(|_| runtime(format!("Cannot parse '{s}' as number"))),
            other => Err(runtime(format!("{} cannot be parsed as a number", type_name(other)))),
        },
        ("map", [f]) => {
            let items: Vec<Value> = match input {
                Value::Array(a) => a.clone(),
                Value::Object(o) => o.values().cloned().collect(),
                other => return Err(runtime(format!("Cannot iterate over {}", type_name(other)))),
            };
            let mut out = Vec::new();
            for item in &items {
                out.extend(eval(f, item)?);
            }
            one(Value::Array(out))
        }
        ("select", [f]) => {
            let mut out = Vec::new();
            for c in eval(f, input)? {
                if is_truthy(&c) {
                    out.push(input.clone());
                }
            }
            Ok(out)
        }
        ("has", [k]) => {
            let mut out = Vec::new();
            for key in eval(k, input)? {
                let present = match (input, &key) {
                    (Value::Object(o), Value::String(s)) => o.contains_key(s),
                    (Value::Array(a), Value::Number(n)) => {
                        n.as_f64().is_some_and(|i| i >= 0.0 && (i as usize) < a.len())
                    }
                    _ => {
                        return Err(runtime(format!(
                            "Cannot check whether {} has a {} key",
                            type_name(input),
                            type_name(&key)
                        )));
                    }
                };
                out.push(Value::Bool(present));
            }
            Ok(out)
        }
        ("join", [sep]) => {
            let Value::Array(items) = input else {
                return Err(runtime(format!("Cannot join {}", type_name(input))));
            };
            let mut out = Vec::new();
            for sep in eval(sep, input)? {
                let Value::String(sep) = sep else {
                    return Err(runtime("join separator must be a string"));
                };
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(match item {
                        Value::Null => String::new(),
                        Value::String(s) => s.clone(),
                        Value::Number(_) | Value::Bool(_) => item.to_string(),
                        other => {
                            return Err(runtime(format!("Cannot join with {}", type_name(other))));
                        }
                    });
                }
                out.push(Value::String(parts.join(&sep)));
            }
            Ok(out)
        }
        _ => Err(runtime(format!("{name}/{} is not defined", args.len()))),
    }
}

fn index_value(target: &Value, key: &Value) -> Result<Value, ExprError> {
    match (target, key) {
        (Value::Null, Value::String(_) | Value::Number(_)) => Ok(Value::Null),
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(n)) => {
            let Some(idx) = n.as_f64() else {
                return Ok(Value::Null);
            };
            let idx = idx.floor() as i64;
            let len = items.len() as i64;
            let idx = if idx < 0 { len + idx } else { idx };
            if idx < 0 || idx >= len {
                Ok(Value::Null)
            } else {
                Ok(items[idx as usize].clone())
            }
        }
        _ => Err(runtime(format!(
            "Cannot index {} with {}",
            type_name(target),
            type_name(key)
        ))),
    }
}

fn slice_bounds(len: usize, from: &Value, to: &Value) -> Result<(usize, usize), ExprError> {
    let len = len as i64;
    let resolve = |v: &Value, default: i64| -> Result<i64, ExprError> {
        match v {
            Value::Null => Ok(default),
            Value::Number(n) => {
                let i = n.as_f64().unwrap_or(0.0).floor() as i64;
                let i = if i < 0 { len + i } else { i };
                Ok(i.clamp(0, len))
            }
            other => Err(runtime(format!("Slice indices must be numbers, got {}", type_name(other)))),
        }
    };
    let start = resolve(from, 0)?;
    let end = resolve(to, len)?.max(start);
    Ok((start as usize, end as usize))
}

fn slice_value(target: &Value, from: &Value, to: &Value) -> Result<Value, ExprError> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let (start, end) = slice_bounds(items.len(), from, to)?;
            Ok(Value::Array(items[start..end].to_vec()))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(chars.len(), from, to)?;
            Ok(Value::String(chars[start..end].iter().collect()))
        }
        other => Err(runtime(format!("Cannot slice {}", type_name(other)))),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(compare_values(l, r) == Ordering::Equal)),
        BinOp::Ne => return Ok(Value::Bool(compare_values(l, r) != Ordering::Equal)),
        BinOp::Lt => return Ok(Value::Bool(compare_values(l, r) == Ordering::Less)),
        BinOp::Le => return Ok(Value::Bool(compare_values(l, r) != Ordering::Greater)),
        BinOp::Gt => return Ok(Value::Bool(compare_values(l, r) == Ordering::Greater)),
        BinOp::Ge => return Ok(Value::Bool(compare_values(l, r) != Ordering::Less)),
        _ => {}
    }

    let cannot = |verb: &str| {
        runtime(format!(
            "{} and {} cannot be {verb}",
            type_name(l),
            type_name(r)
        ))
    };

    match (op, l, r) {
        (BinOp::Add, Value::Null, other) | (BinOp::Add, other, Value::Null) => Ok(other.clone()),
        (BinOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (BinOp::Add, Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        (BinOp::Add, Value::Object(a), Value::Object(b)) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(out))
        }
        (BinOp::Sub, Value::Array(a), Value::Array(b)) => Ok(Value::Array(
            a.iter()
                .filter(|x| !b.iter().any(|y| compare_values(x, y) == Ordering::Equal))
                .cloned()
                .collect(),
        )),
        (BinOp::Div, Value::String(a), Value::String(b)) => Ok(Value::Array(
            if a.is_empty() {
                Vec::new()
            } else {
                a.split(b.as_str()).map(|s| Value::String(s.to_string())).collect()
            },
        )),
        (_, Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            match op {
                BinOp::Add => Ok(number_value(a + b)),
                BinOp::Sub => Ok(number_value(a - b)),
                BinOp::Mul => Ok(number_value(a * b)),
                BinOp::Div if b == 0.0 => Err(cannot("divided because the divisor is zero")),
                BinOp::Div => Ok(number_value(a / b)),
                BinOp::Rem => {
                    let (a, b) = (a as i64, b as i64);
                    if b == 0 {
                        return Err(cannot("divided because the divisor is zero"));
                    }
                    a.checked_rem(b)
                        .map(Value::from)
                        .ok_or_else(|| cannot("divided because the remainder overflows"))
                }
                _ => Err(cannot("combined")),
            }
        }
        (BinOp::Add, ..) => Err(cannot("added")),
        (BinOp::Sub, ..) => Err(cannot("subtracted")),
        (BinOp::Mul, ..) => Err(cannot("multiplied")),
        (BinOp::Div | BinOp::Rem, ..) => Err(cannot("divided")),
        _ => Err(cannot("combined")),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn is_truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order over JSON values: null < false < true < numbers < strings < arrays < objects.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (xi, yi) in x.iter().zip(y.iter()) {
                let ord = compare_values(xi, yi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let mut xk: Vec<&String> = x.keys().collect();
            let mut yk: Vec<&String> = y.keys().collect();
            xk.sort();
            yk.sort();
            let ord = xk.cmp(&yk);
            if ord != Ordering::Equal {
                return ord;
            }
            for k in xk {
                let ord = compare_values(&x[k], &y[k]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(q: &str, input: Value) -> Vec<Value> {
        QueryProgram::compile(q)
            .unwrap_or_else(|e| panic!("compile {q}: {e}"))
            .run(&input)
            .unwrap_or_else(|e| panic!("run {q}: {e}"))
    }

    #[test]
    fn field_access_and_identity() {
        assert_eq!(run(".a", json!({"a": 1, "b": 2})), vec![json!(1)]);
        assert_eq!(run(".", json!([1])), vec![json!([1])]);
        assert_eq!(run(".a.b", json!({"a": {"b": "x"}})), vec![json!("x")]);
        assert_eq!(run(".missing", json!({})), vec![Value::Null]);
        assert_eq!(run(".\"with space\"", json!({"with space": true})), vec![json!(true)]);
    }

    #[test]
    fn iteration_indexing_and_slicing() {
        let input = json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}]});
        assert_eq!(run(".items[].id", input.clone()), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(run(".items[-1].id", input.clone()), vec![json!(3)]);
        assert_eq!(run("[.items[1:][].id]", input.clone()), vec![json!([2, 3])]);
        assert_eq!(run(".items | length", input), vec![json!(3)]);
    }

    #[test]
    fn construction_and_builtins() {
        let input = json!({"name": "berlin", "temps": [3, 1, 2]});
        assert_eq!(
            run("{city: .name, max: (.temps | sort | last)}", input.clone()),
            vec![json!({"city": "berlin", "max": 3})]
        );
        assert_eq!(run("[.temps[] | select(. > 1)]", input.clone()), vec![json!([3, 2])]);
        assert_eq!(run(".temps | map(. * 10)", input.clone()), vec![json!([30, 10, 20])]);
        assert_eq!(run("{name}", input.clone()), vec![json!({"name": "berlin"})]);
        assert_eq!(run("keys", input), vec![json!(["name", "temps"])]);
        assert_eq!(run("[\"a\", \"b\"] | join(\"-\")", Value::Null), vec![json!("a-b")]);
    }

    #[test]
    fn alternative_conditionals_and_optional() {
        assert_eq!(run(".a // \"fallback\"", json!({})), vec![json!("fallback")]);
        assert_eq!(run(".a // \"fallback\"", json!({"a": 0})), vec![json!(0)]);
        assert_eq!(
            run("if .n > 2 then \"big\" elif .n > 0 then \"small\" else \"none\" end", json!({"n": 1})),
            vec![json!("small")]
        );
        assert!(run(".[0]?", json!({"a": 1})).is_empty());
        assert_eq!(run(".a and .b", json!({"a": true, "b": null})), vec![json!(false)]);
    }

    #[test]
    fn comma_emits_multiple_values_in_order() {
        assert_eq!(run(".a, .b", json!({"a": 1, "b": 2})), vec![json!(1), json!(2)]);
        assert_eq!(run("(1, 2) + (10, 20)", Value::Null), vec![json!(11), json!(12), json!(21), json!(22)]);
    }

    #[test]
    fn runtime_errors_surface() {
        let prog = QueryProgram::compile(".a.b").expect("compile");
        let err = prog.run(&json!({"a": 5})).expect_err("cannot index number");
        assert!(matches!(err, ExprError::Runtime(_)));
    }

    #[test]
    fn remainder_overflow_and_zero_divisor_are_errors() {
        let prog = QueryProgram::compile(".a % .b").expect("compile");
        let err = prog
            .run(&json!({"a": i64::MIN, "b": -1}))
            .expect_err("overflowing remainder");
        assert!(matches!(err, ExprError::Runtime(_)), "{err}");
        let err = prog.run(&json!({"a": 7, "b": 0})).expect_err("zero divisor");
        assert!(matches!(err, ExprError::Runtime(_)), "{err}");
        assert_eq!(prog.run(&json!({"a": -7, "b": 3})).expect("rem"), vec![json!(-1)]);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(QueryProgram::compile("").is_err());
        assert!(QueryProgram::compile("   ").is_err());
        assert!(QueryProgram::compile(".a |").is_err());
        assert!(QueryProgram::compile("nosuchfn").is_err());
        assert!(QueryProgram::compile("[.a").is_err());
    }
}
