//! Response shaping: turn a raw upstream body into the payload returned to the client.
//!
//! Three modes:
//! - `direct`: parse the body as JSON
//! - `query`: parse, then run a jq-style query and keep the last emitted value
//! - `template`: parse, then render a text template; JSON-looking output is re-parsed
//!
//! Shapers are compiled once (at startup) and are immutable afterwards, so they can be shared
//! across tasks behind an `Arc`.

use crate::query::{ExprError, QueryProgram};
use crate::template::{Template, TemplateError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Declarative shaping mode, as written in configuration or in an operation's
/// `x-response-transform` extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ResponseShaping {
    #[default]
    Direct,
    Query {
        expression: String,
    },
    Template {
        template: String,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("response body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("query expression is empty")]
    EmptyExpression,
    #[error("template is empty")]
    EmptyTemplate,
    #[error(transparent)]
    Query(#[from] ExprError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, Clone)]
enum CompiledMode {
    Direct,
    Query(QueryProgram),
    Template(Template),
}

/// A compiled shaper.
#[derive(Debug, Clone)]
pub struct CompiledShaper {
    mode: CompiledMode,
}

impl Default for CompiledShaper {
    fn default() -> Self {
        Self {
            mode: CompiledMode::Direct,
        }
    }
}

/// Compile a shaping mode.
///
/// # Errors
///
/// Returns an error if a query expression or template is empty or fails to parse.
pub fn compile_shaper(shaping: &ResponseShaping) -> Result<Arc<CompiledShaper>, ShapeError> {
    let mode = match shaping {
        ResponseShaping::Direct => CompiledMode::Direct,
        ResponseShaping::Query { expression } => {
            if expression.trim().is_empty() {
                return Err(ShapeError::EmptyExpression);
            }
            CompiledMode::Query(QueryProgram::compile(expression)?)
        }
        ResponseShaping::Template { template } => {
            if template.is_empty() {
                return Err(ShapeError::EmptyTemplate);
            }
            CompiledMode::Template(Template::parse(template)?)
        }
    };
    Ok(Arc::new(CompiledShaper { mode }))
}

impl CompiledShaper {
    #[must_use]
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            CompiledMode::Direct => "direct",
            CompiledMode::Query(_) => "query",
            CompiledMode::Template(_) => "template",
        }
    }

    /// Shape a raw response body.
    ///
    /// An empty (or whitespace-only) body is treated as JSON `null`, so `204 No Content`
    /// responses shape cleanly.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not JSON, or if the query/template fails at runtime.
    pub fn shape(&self, raw: &[u8]) -> Result<Value, ShapeError> {
        let parsed = parse_body(raw)?;
        match &self.mode {
            CompiledMode::Direct => Ok(parsed),
            CompiledMode::Query(program) => {
                let mut emitted = program.run(&parsed)?;
                Ok(emitted.pop().unwrap_or(Value::Null))
            }
            CompiledMode::Template(template) => {
                let rendered = template.render(&parsed)?;
                Ok(serde_json::from_str::<Value>(&rendered).unwrap_or(Value::String(rendered)))
            }
        }
    }
}

fn parse_body(raw: &[u8]) -> Result<Value, ShapeError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(raw).map_err(|e| ShapeError::InvalidJson(e.to_string()))
}
