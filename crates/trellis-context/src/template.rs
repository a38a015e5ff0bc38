//! Template string parsing and evaluation.
//!
//! A template string mixes literal text with `${dotted.path}` expressions;
//! nested `${…}` inside an expression is resolved innermost-first. A string
//! that is exactly one expression may resolve to any primitive; otherwise
//! primitives are stringified into the surrounding text.

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::TemplateError;
use crate::node::ContextNode;

/// A parsed piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Raw expression text between `${` and `}`, trimmed.
    Expression(String),
}

/// Split a template string into literal and expression segments.
pub fn parse_template(input: &str) -> Result<Vec<Segment>, TemplateError> {
    let chars: Vec<char> = input.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '$' && i + 1 < chars.len() && chars[i + 1] == '{' {
            let mut depth = 1;
            let mut j = i + 2;
            while j < chars.len() {
                if chars[j] == '$' && j + 1 < chars.len() && chars[j + 1] == '{' {
                    depth += 1;
                    j += 2;
                    continue;
                }
                if chars[j] == '}' {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                j += 1;
            }
            if depth != 0 {
                return Err(TemplateError::Parse {
                    input: input.to_string(),
                    reason: "unterminated '${'".to_string(),
                });
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            let expr: String = chars[i + 2..j].iter().collect();
            let expr = expr.trim().to_string();
            if expr.is_empty() {
                return Err(TemplateError::Parse {
                    input: input.to_string(),
                    reason: "empty expression".to_string(),
                });
            }
            segments.push(Segment::Expression(expr));
            i = j + 1;
        } else {
            literal.push(chars[i]);
            i += 1;
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Evaluates template strings over a context tree.
pub struct TemplateEngine {
    root: ContextNode,
}

impl TemplateEngine {
    pub fn new(root: ContextNode) -> Self {
        Self { root }
    }

    /// Whether a string contains any template expression.
    pub fn contains_template(input: &str) -> bool {
        input.contains("${")
    }

    /// Resolve a template string to a primitive value.
    pub async fn resolve_string(&self, input: &str) -> Result<Value, TemplateError> {
        let mut stack = Vec::new();
        self.resolve_template(input.to_string(), &mut stack).await
    }

    /// Deep-resolve every template string inside a JSON value.
    pub async fn resolve_value(&self, value: &Value) -> Result<Value, TemplateError> {
        let mut stack = Vec::new();
        self.resolve_value_inner(value.clone(), &mut stack).await
    }

    fn resolve_value_inner<'a>(
        &'a self,
        value: Value,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Value, TemplateError>> {
        Box::pin(async move {
            match value {
                Value::String(s) if Self::contains_template(&s) => {
                    self.resolve_template(s, stack).await
                }
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_value_inner(item, stack).await?);
                    }
                    Ok(Value::Array(out))
                }
                Value::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key, self.resolve_value_inner(item, stack).await?);
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other),
            }
        })
    }

    fn resolve_template<'a>(
        &'a self,
        input: String,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Value, TemplateError>> {
        Box::pin(async move {
            let segments = parse_template(&input)?;

            if let [Segment::Expression(expr)] = segments.as_slice() {
                return self.resolve_expression(expr.clone(), stack).await;
            }

            let mut out = String::new();
            for segment in segments {
                match segment {
                    Segment::Literal(text) => out.push_str(&text),
                    Segment::Expression(expr) => {
                        let value = self.resolve_expression(expr, stack).await?;
                        out.push_str(&primitive_to_string(&value));
                    }
                }
            }
            Ok(Value::String(out))
        })
    }

    fn resolve_expression<'a>(
        &'a self,
        expr: String,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Value, TemplateError>> {
        Box::pin(async move {
            // Nested interpolation: resolve the expression text itself first.
            let path = if Self::contains_template(&expr) {
                match self.resolve_template(expr.clone(), stack).await? {
                    Value::String(s) => s,
                    other => primitive_to_string(&other),
                }
            } else {
                expr
            };

            let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
            if segments.iter().any(|s| s.is_empty()) {
                return Err(TemplateError::Parse {
                    input: path.clone(),
                    reason: "empty path segment".to_string(),
                });
            }

            let fq = segments.join(".");
            if let Some(pos) = stack.iter().position(|p| *p == fq) {
                let mut cycle: Vec<String> = stack[pos..].to_vec();
                cycle.push(fq);
                return Err(TemplateError::CircularReference { cycle });
            }

            stack.push(fq.clone());
            let result = self.resolve_path(&segments, &fq, stack).await;
            stack.pop();
            result
        })
    }

    async fn resolve_path(
        &self,
        segments: &[String],
        fq: &str,
        stack: &mut Vec<String>,
    ) -> Result<Value, TemplateError> {
        let mut current = self.root.clone();
        let mut consumed: Vec<&str> = Vec::new();
        let mut idx = 0;

        while idx < segments.len() {
            let segment = segments[idx].as_str();
            // Keys with a leading underscore are private.
            if segment.starts_with('_') {
                return Err(TemplateError::KeyNotFound {
                    path: joined(&consumed, segment),
                });
            }
            current = match current {
                ContextNode::Lazy(lazy) => lazy.resolve().await?,
                ContextNode::Tree(map) => {
                    let next = map.get(segment).cloned().ok_or_else(|| {
                        TemplateError::KeyNotFound {
                            path: joined(&consumed, segment),
                        }
                    })?;
                    consumed.push(&segments[idx]);
                    idx += 1;
                    next
                }
                ContextNode::Value(Value::Object(map)) => {
                    let next = map.get(segment).cloned().ok_or_else(|| {
                        TemplateError::KeyNotFound {
                            path: joined(&consumed, segment),
                        }
                    })?;
                    consumed.push(&segments[idx]);
                    idx += 1;
                    ContextNode::Value(next)
                }
                ContextNode::Value(_) => {
                    return Err(TemplateError::KeyNotFound {
                        path: joined(&consumed, segment),
                    })
                }
            };
        }

        loop {
            current = match current {
                ContextNode::Lazy(lazy) => lazy.resolve().await?,
                ContextNode::Value(Value::String(s)) if Self::contains_template(&s) => {
                    return self.resolve_template(s, stack).await;
                }
                ContextNode::Value(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                    return Ok(value);
                }
                ContextNode::Value(Value::Null) => {
                    return Err(TemplateError::KeyNotFound {
                        path: fq.to_string(),
                    });
                }
                _ => {
                    return Err(TemplateError::NonPrimitive {
                        path: fq.to_string(),
                    });
                }
            };
        }
    }
}

fn joined(consumed: &[&str], next: &str) -> String {
    let mut parts: Vec<&str> = consumed.to_vec();
    parts.push(next);
    parts.join(".")
}

fn primitive_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
