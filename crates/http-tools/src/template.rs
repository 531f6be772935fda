//! Text templates over JSON data, following Go `text/template` syntax.
//!
//! Supported actions: `{{.}}`, `{{.a.b}}`, `{{$}}`, `{{$.a}}`, variables declared by
//! `{{$x := ...}}` or `{{range $i, $v := ...}}`, `if`/`else if`/`else`, `range`/`else`,
//! `with`/`else`, `end`, comments, trim markers, parenthesized sub-pipelines, and `|` pipelines.
//! Functions: `len index json eq ne lt le gt ge not and or print`.

use crate::query::compare_values;
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("template execution error: {0}")]
    Exec(String),
}

fn exec_err(msg: impl Into<String>) -> TemplateError {
    TemplateError::Exec(msg.into())
}

#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template source.
    ///
    /// # Errors
    ///
    /// Returns a parse error for unbalanced delimiters, unknown functions, or misplaced
    /// `else`/`end` actions.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let items = split_items(source)?;
        let mut parser = NodeParser { items, pos: 0 };
        let (nodes, stop) = parser.parse_nodes()?;
        match stop {
            Stop::Eof => Ok(Self { nodes }),
            Stop::End(offset) => Err(TemplateError::Parse {
                offset,
                message: "unexpected {{end}}".to_string(),
            }),
            Stop::Else(offset) | Stop::ElseIf(offset, _) => Err(TemplateError::Parse {
                offset,
                message: "unexpected {{else}}".to_string(),
            }),
        }
    }

    /// Render against `data`.
    ///
    /// # Errors
    ///
    /// Returns an error when a field is accessed on a non-object or a function is misused.
    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        let mut state = ExecState {
            root: data,
            vars: Vec::new(),
        };
        let mut out = String::new();
        state.walk(&self.nodes, data, &mut out)?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Splitting text and actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Item {
    Text(String),
    Action { offset: usize, tokens: Vec<Tok> },
}

fn split_items(src: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = src;
    let mut base = 0usize;
    let mut trim_next_left = false;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        if trim_next_left {
            text = text.trim_start();
        }
        let after_open = &rest[open + 2..];
        let trim_left = after_open.starts_with("- ")
            || after_open.starts_with("-\t")
            || after_open.starts_with("-\n")
            || after_open.starts_with("-\r");
        if trim_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }

        let action_offset = base + open;
        let inner_start = if trim_left { 3 } else { 2 };
        let body = &rest[open + inner_start..];
        let close = find_close(body).ok_or_else(|| TemplateError::Parse {
            offset: action_offset,
            message: "unclosed action".to_string(),
        })?;

        let mut inner = &body[..close];
        let trim_right = inner.ends_with(" -")
            || inner.ends_with("\t-")
            || inner.ends_with("\n-")
            || inner.ends_with("\r-");
        if trim_right {
            inner = &inner[..inner.len() - 1];
        }
        trim_next_left = trim_right;

        let trimmed = inner.trim();
        if !(trimmed.starts_with("/*") && trimmed.ends_with("*/")) {
            let tokens = lex_action(inner, action_offset)?;
            if tokens.is_empty() {
                return Err(TemplateError::Parse {
                    offset: action_offset,
                    message: "empty action".to_string(),
                });
            }
            items.push(Item::Action {
                offset: action_offset,
                tokens,
            });
        }

        let consumed = open + inner_start + close + 2;
        base += consumed;
        rest = &rest[consumed..];
    }

    let text = if trim_next_left { rest.trim_start() } else { rest };
    if !text.is_empty() {
        items.push(Item::Text(text.to_string()));
    }
    Ok(items)
}

/// Find the `}}` closing an action, skipping over quoted strings.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q == b'"' {
                    i += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

// ---------------------------------------------------------------------------
// Action lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Ident(String),
    Lit(Value),
    LParen,
    RParen,
    Pipe,
    Comma,
    Declare,
}

fn lex_action(src: &str, offset: usize) -> Result<Vec<Tok>, TemplateError> {
    let chars: Vec<char> = src.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let err = |message: String| TemplateError::Parse { offset, message };

    let read_ident = |start: usize| -> (String, usize) {
        let mut j = start;
        let mut s = String::new();
        while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
            s.push(chars[j]);
            j += 1;
        }
        (s, j)
    };
    let read_fields = |mut j: usize| -> (Vec<String>, usize) {
        let mut fields = Vec::new();
        while j < chars.len()
            && chars[j] == '.'
            && chars
                .get(j + 1)
                .is_some_and(|c| c.is_alphabetic() || *c == '_')
        {
            let (name, next) = read_ident(j + 1);
            fields.push(name);
            j = next;
        }
        (fields, j)
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                let (fields, next) = read_fields(i);
                if fields.is_empty() {
                    out.push(Tok::Dot);
                    i += 1;
                } else {
                    out.push(Tok::Field(fields));
                    i = next;
                }
            }
            '$' => {
                let (name, next) = read_ident(i + 1);
                let (fields, next) = read_fields(next);
                let name = if name.is_empty() { "$".to_string() } else { name };
                out.push(Tok::Var(name, fields));
                i = next;
            }
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '|' => {
                out.push(Tok::Pipe);
                i += 1;
            }
            ',' => {
                out.push(Tok::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&'=') => {
                out.push(Tok::Declare);
                i += 2;
            }
            '"' => {
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    let Some(&ch) = chars.get(j) else {
                        return Err(err("unterminated quoted string".to_string()));
                    };
                    match ch {
                        '"' => break,
                        '\\' => {
                            let esc = chars.get(j + 1).copied().unwrap_or('\\');
                            s.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                            j += 2;
                        }
                        other => {
                            s.push(other);
                            j += 1;
                        }
                    }
                }
                out.push(Tok::Lit(Value::String(s)));
                i = j + 1;
            }
            '`' => {
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    let Some(&ch) = chars.get(j) else {
                        return Err(err("unterminated raw string".to_string()));
                    };
                    if ch == '`' {
                        break;
                    }
                    s.push(ch);
                    j += 1;
                }
                out.push(Tok::Lit(Value::String(s)));
                i = j + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].is_ascii_digit() || chars[j] == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().collect();
                let value = if let Ok(n) = text.parse::<i64>() {
                    Value::from(n)
                } else {
                    let f: f64 = text
                        .parse()
                        .map_err(|_| err(format!("bad number syntax: {text}")))?;
                    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
                };
                out.push(Tok::Lit(value));
                i = j;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (name, next) = read_ident(i);
                out.push(match name.as_str() {
                    "true" => Tok::Lit(Value::Bool(true)),
                    "false" => Tok::Lit(Value::Bool(false)),
                    "nil" => Tok::Lit(Value::Null),
                    _ => Tok::Ident(name),
                });
                i = next;
            }
            other => return Err(err(format!("unexpected character '{other}' in action"))),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Structure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Action(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    With {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
struct Pipeline {
    decl: Vec<String>,
    cmds: Vec<Command>,
}

#[derive(Debug, Clone)]
struct Command {
    args: Vec<Operand>,
}

#[derive(Debug, Clone)]
enum Operand {
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Lit(Value),
    Func(String),
    Sub(Pipeline),
}

const FUNCTIONS: &[&str] = &[
    "len", "index", "json", "eq", "ne", "lt", "le", "gt", "ge", "not", "and", "or", "print",
];

enum Stop {
    Eof,
    End(usize),
    Else(usize),
    ElseIf(usize, Pipeline),
}

struct NodeParser {
    items: Vec<Item>,
    pos: usize,
}

impl NodeParser {
    fn parse_nodes(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(item) = self.items.get(self.pos).cloned() {
            self.pos += 1;
            let (offset, tokens) = match item {
                Item::Text(t) => {
                    nodes.push(Node::Text(t));
                    continue;
                }
                Item::Action { offset, tokens } => (offset, tokens),
            };

            let keyword = match tokens.first() {
                Some(Tok::Ident(k)) => k.as_str(),
                _ => "",
            };
            let rest = &tokens[1.min(tokens.len())..];
            match keyword {
                "end" => return Ok((nodes, Stop::End(offset))),
                "else" => {
                    if let Some(Tok::Ident(k)) = rest.first()
                        && k == "if"
                    {
                        let pipe = parse_pipeline(&rest[1..], offset)?;
                        return Ok((nodes, Stop::ElseIf(offset, pipe)));
                    }
                    if !rest.is_empty() {
                        return Err(TemplateError::Parse {
                            offset,
                            message: "unexpected tokens after else".to_string(),
                        });
                    }
                    return Ok((nodes, Stop::Else(offset)));
                }
                "if" => {
                    let pipe = parse_pipeline(rest, offset)?;
                    nodes.push(self.parse_if(pipe, offset)?);
                }
                "range" | "with" => {
                    let pipe = parse_pipeline(rest, offset)?;
                    let (body, stop) = self.parse_nodes()?;
                    let otherwise = match stop {
                        Stop::End(_) => Vec::new(),
                        Stop::Else(_) => self.parse_until_end(offset)?,
                        Stop::ElseIf(at, _) => {
                            return Err(TemplateError::Parse {
                                offset: at,
                                message: format!("else if is not allowed in {keyword}"),
                            });
                        }
                        Stop::Eof => {
                            return Err(TemplateError::Parse {
                                offset,
                                message: format!("unclosed {keyword}"),
                            });
                        }
                    };
                    nodes.push(if keyword == "range" {
                        Node::Range {
                            pipe,
                            body,
                            otherwise,
                        }
                    } else {
                        Node::With {
                            pipe,
                            body,
                            otherwise,
                        }
                    });
                }
                "define" | "template" | "block" | "break" | "continue" => {
                    return Err(TemplateError::Parse {
                        offset,
                        message: format!("'{keyword}' is not supported"),
                    });
                }
                _ => nodes.push(Node::Action(parse_pipeline(&tokens, offset)?)),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn parse_until_end(&mut self, offset: usize) -> Result<Vec<Node>, TemplateError> {
        match self.parse_nodes()? {
            (nodes, Stop::End(_)) => Ok(nodes),
            (_, Stop::Eof) => Err(TemplateError::Parse {
                offset,
                message: "missing {{end}}".to_string(),
            }),
            (_, Stop::Else(at) | Stop::ElseIf(at, _)) => Err(TemplateError::Parse {
                offset: at,
                message: "unexpected {{else}} after {{else}}".to_string(),
            }),
        }
    }

    fn parse_if(&mut self, first: Pipeline, offset: usize) -> Result<Node, TemplateError> {
        let mut branches = Vec::new();
        let mut cond = first;
        loop {
            let (body, stop) = self.parse_nodes()?;
            branches.push((cond, body));
            match stop {
                Stop::End(_) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Stop::Else(_) => {
                    let otherwise = self.parse_until_end(offset)?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                Stop::ElseIf(_, next) => cond = next,
                Stop::Eof => {
                    return Err(TemplateError::Parse {
                        offset,
                        message: "unclosed if".to_string(),
                    });
                }
            }
        }
    }
}

fn parse_pipeline(tokens: &[Tok], offset: usize) -> Result<Pipeline, TemplateError> {
    let err = |message: &str| TemplateError::Parse {
        offset,
        message: message.to_string(),
    };

    let mut decl = Vec::new();
    let mut rest = tokens;
    match tokens {
        [Tok::Var(a, fa), Tok::Declare, ..] if fa.is_empty() => {
            decl.push(a.clone());
            rest = &tokens[2..];
        }
        [Tok::Var(a, fa), Tok::Comma, Tok::Var(b, fb), Tok::Declare, ..]
            if fa.is_empty() && fb.is_empty() =>
        {
            decl.push(a.clone());
            decl.push(b.clone());
            rest = &tokens[4..];
        }
        _ => {}
    }
    if rest.is_empty() {
        return Err(err("missing value in action"));
    }

    let mut cmds = Vec::new();
    let mut pos = 0;
    loop {
        let mut args = Vec::new();
        while pos < rest.len() && rest[pos] != Tok::Pipe {
            let (operand, next) = parse_operand(rest, pos, offset)?;
            args.push(operand);
            pos = next;
        }
        if args.is_empty() {
            return Err(err("empty command in pipeline"));
        }
        cmds.push(Command { args });
        if pos >= rest.len() {
            break;
        }
        pos += 1;
    }
    Ok(Pipeline { decl, cmds })
}

fn parse_operand(tokens: &[Tok], pos: usize, offset: usize) -> Result<(Operand, usize), TemplateError> {
    let err = |message: String| TemplateError::Parse { offset, message };
    let operand = match &tokens[pos] {
        Tok::Dot => Operand::Dot,
        Tok::Field(f) => Operand::Field(f.clone()),
        Tok::Var(name, f) => Operand::Var(name.clone(), f.clone()),
        Tok::Lit(v) => Operand::Lit(v.clone()),
        Tok::Ident(name) => {
            if !FUNCTIONS.contains(&name.as_str()) {
                return Err(err(format!("function \"{name}\" not defined")));
            }
            Operand::Func(name.clone())
        }
        Tok::LParen => {
            let mut depth = 0usize;
            let mut end = None;
            for (i, t) in tokens.iter().enumerate().skip(pos) {
                match t {
                    Tok::LParen => depth += 1,
                    Tok::RParen => {
                        depth -= 1;
                        if depth == 0 {
                            end = Some(i);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let end = end.ok_or_else(|| err("unclosed left paren".to_string()))?;
            let inner = parse_pipeline(&tokens[pos + 1..end], offset)?;
            return Ok((Operand::Sub(inner), end + 1));
        }
        other => return Err(err(format!("unexpected {other:?} in command"))),
    };
    Ok((operand, pos + 1))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

struct ExecState<'a> {
    root: &'a Value,
    vars: Vec<(String, Value)>,
}

impl ExecState<'_> {
    fn walk(&mut self, nodes: &[Node], dot: &Value, out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Action(pipe) => {
                    let value = self.eval_pipeline(pipe, dot)?;
                    if pipe.decl.is_empty() {
                        out.push_str(&display(&value));
                    } else {
                        for name in &pipe.decl {
                            self.vars.push((name.clone(), value.clone()));
                        }
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mark = self.vars.len();
                    let mut taken = false;
                    for (cond, body) in branches {
                        if is_true(&self.eval_pipeline(cond, dot)?) {
                            self.walk(body, dot, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.walk(otherwise, dot, out)?;
                    }
                    self.vars.truncate(mark);
                }
                Node::With {
                    pipe,
                    body,
                    otherwise,
                } => {
                    let mark = self.vars.len();
                    let value = self.eval_pipeline(pipe, dot)?;
                    if is_true(&value) {
                        self.walk(body, &value, out)?;
                    } else {
                        self.walk(otherwise, dot, out)?;
                    }
                    self.vars.truncate(mark);
                }
                Node::Range {
                    pipe,
                    body,
                    otherwise,
                } => self.walk_range(pipe, body, otherwise, dot, out)?,
            }
        }
        Ok(())
    }

    fn walk_range(
        &mut self,
        pipe: &Pipeline,
        body: &[Node],
        otherwise: &[Node],
        dot: &Value,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        let unbound = Pipeline {
            decl: Vec::new(),
            cmds: pipe.cmds.clone(),
        };
        let value = self.eval_pipeline(&unbound, dot)?;
        let entries: Vec<(Value, Value)> = match &value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v.clone()))
                .collect(),
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                keys.into_iter()
                    .map(|k| (Value::String(k.clone()), map[k].clone()))
                    .collect()
            }
            Value::Null => Vec::new(),
            other => return Err(exec_err(format!("range can't iterate over {other}"))),
        };

        if entries.is_empty() {
            return self.walk(otherwise, dot, out);
        }

        for (key, elem) in entries {
            let mark = self.vars.len();
            match pipe.decl.as_slice() {
                [v] => self.vars.push((v.clone(), elem.clone())),
                [k, v] => {
                    self.vars.push((k.clone(), key));
                    self.vars.push((v.clone(), elem.clone()));
                }
                _ => {}
            }
            self.walk(body, &elem, out)?;
            self.vars.truncate(mark);
        }
        Ok(())
    }

    fn eval_pipeline(&mut self, pipe: &Pipeline, dot: &Value) -> Result<Value, TemplateError> {
        let mut piped: Option<Value> = None;
        for cmd in &pipe.cmds {
            piped = Some(self.eval_command(cmd, dot, piped)?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn eval_command(
        &mut self,
        cmd: &Command,
        dot: &Value,
        piped: Option<Value>,
    ) -> Result<Value, TemplateError> {
        let Some((first, rest)) = cmd.args.split_first() else {
            return Err(exec_err("empty command"));
        };
        if let Operand::Func(name) = first {
            let mut args = Vec::with_capacity(rest.len() + 1);
            for a in rest {
                args.push(self.eval_operand(a, dot)?);
            }
            if let Some(p) = piped {
                args.push(p);
            }
            return call_function(name, &args);
        }
        if !rest.is_empty() || piped.is_some() {
            return Err(exec_err("can't give argument to non-function"));
        }
        self.eval_operand(first, dot)
    }

    fn eval_operand(&mut self, operand: &Operand, dot: &Value) -> Result<Value, TemplateError> {
        match operand {
            Operand::Dot => Ok(dot.clone()),
            Operand::Field(fields) => walk_fields(dot, fields),
            Operand::Var(name, fields) => {
                let base = if name == "$" {
                    self.root.clone()
                } else {
                    self.vars
                        .iter()
                        .rev()
                        .find(|(n, _)| n == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| exec_err(format!("undefined variable: ${name}")))?
                };
                walk_fields(&base, fields)
            }
            Operand::Lit(v) => Ok(v.clone()),
            Operand::Func(name) => call_function(name, &[]),
            Operand::Sub(pipe) => self.eval_pipeline(pipe, dot),
        }
    }
}

fn walk_fields(base: &Value, fields: &[String]) -> Result<Value, TemplateError> {
    let mut cur = base.clone();
    for f in fields {
        cur = match cur {
            Value::Object(mut map) => map.remove(f).unwrap_or(Value::Null),
            Value::Null => Value::Null,
            other => {
                return Err(exec_err(format!(
                    "can't evaluate field {f} in type {}",
                    crate::query::type_name(&other)
                )));
            }
        };
    }
    Ok(cur)
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, TemplateError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(exec_err(format!(
                "wrong number of args for {name}: want {n} got {}",
                args.len()
            )))
        }
    };
    match name {
        "len" => {
            arity(1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::from(s.len())),
                Value::Array(a) => Ok(Value::from(a.len())),
                Value::Object(o) => Ok(Value::from(o.len())),
                other => Err(exec_err(format!("len of {} is not supported", crate::query::type_name(other)))),
            }
        }
        "index" => {
            let Some((first, keys)) = args.split_first() else {
                return Err(exec_err("index of untyped nil"));
            };
            let mut cur = first.clone();
            for key in keys {
                cur = match (&cur, key) {
                    (Value::Object(map), Value::String(k)) => {
                        map.get(k).cloned().unwrap_or(Value::Null)
                    }
                    (Value::Array(items), Value::Number(n)) => {
                        let i = n
                            .as_u64()
                            .and_then(|i| usize::try_from(i).ok())
                            .ok_or_else(|| exec_err(format!("error calling index: index {n} out of range")))?;
                        items
                            .get(i)
                            .cloned()
                            .ok_or_else(|| exec_err(format!("error calling index: index out of range: {i}")))?
                    }
                    (Value::Null, _) => Value::Null,
                    (other, key) => {
                        return Err(exec_err(format!(
                            "can't index item of type {} with {key}",
                            crate::query::type_name(other)
                        )));
                    }
                };
            }
            Ok(cur)
        }
        "json" => {
            arity(1)?;
            serde_json::to_string(&args[0])
                .map(Value::String)
                .map_err(|e| exec_err(e.to_string()))
        }
        "eq" => {
            let Some((first, rest)) = args.split_first() else {
                return Err(exec_err("missing arguments for comparison"));
            };
            if rest.is_empty() {
                return Err(exec_err("missing arguments for comparison"));
            }
            Ok(Value::Bool(
                rest.iter()
                    .any(|v| compare_values(first, v) == Ordering::Equal),
            ))
        }
        "ne" | "lt" | "le" | "gt" | "ge" => {
            arity(2)?;
            let ord = compare_values(&args[0], &args[1]);
            Ok(Value::Bool(match name {
                "ne" => ord != Ordering::Equal,
                "lt" => ord == Ordering::Less,
                "le" => ord != Ordering::Greater,
                "gt" => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        "not" => {
            arity(1)?;
            Ok(Value::Bool(!is_true(&args[0])))
        }
        "and" => Ok(args
            .iter()
            .find(|v| !is_true(v))
            .or_else(|| args.last())
            .cloned()
            .unwrap_or(Value::Null)),
        "or" => Ok(args
            .iter()
            .find(|v| is_true(v))
            .or_else(|| args.last())
            .cloned()
            .unwrap_or(Value::Null)),
        "print" => {
            let mut out = String::new();
            for (i, v) in args.iter().enumerate() {
                if i > 0 && !v.is_string() && !args[i - 1].is_string() {
                    out.push(' ');
                }
                out.push_str(&display(v));
            }
            Ok(Value::String(out))
        }
        other => Err(exec_err(format!("function \"{other}\" not defined"))),
    }
}

fn is_true(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display(v: &Value) -> String {
    match v {
        Value::Null => "<no value>".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
