// src/config/template.rs

//! `<%= … %>` template markers.
//!
//! A marker's expression is either a *free* identifier — an external
//! parameter the caller must supply — or a *bound* path of the form
//! `$.task.(input|output).key` that resolves against the configuration
//! tree.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::errors::{Result, TaskDagError};

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<%=(.*?)%>").expect("marker pattern is valid"))
}

fn whole_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*<%=(.*?)%>\s*$").expect("marker pattern is valid"))
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
}

/// Which sub-mapping of a task a path points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Input,
    Output,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Input => "input",
            Section::Output => "output",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved `$.task.section.key` path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamPath {
    pub task: String,
    pub section: Section,
    pub key: String,
}

impl fmt::Display for ParamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$.{}.{}.{}", self.task, self.section, self.key)
    }
}

/// Expression inside a marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateExpr {
    /// Bare identifier — a required external parameter.
    Free(String),
    /// Path into the configuration tree.
    Path(ParamPath),
}

impl TemplateExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if let Some(rest) = expr.strip_prefix("$.") {
            let parts: Vec<&str> = rest.split('.').collect();
            if parts.len() != 3 {
                return Err(TaskDagError::Config(format!(
                    "template path '$.{rest}' must look like '$.task.input.key' \
                     or '$.task.output.key'"
                )));
            }
            let section = match parts[1] {
                "input" => Section::Input,
                "output" => Section::Output,
                other => {
                    return Err(TaskDagError::Config(format!(
                        "template path section must be 'input' or 'output', got '{other}'"
                    )));
                }
            };
            return Ok(TemplateExpr::Path(ParamPath {
                task: parts[0].to_string(),
                section,
                key: parts[2].to_string(),
            }));
        }

        if identifier_re().is_match(expr) {
            return Ok(TemplateExpr::Free(expr.to_string()));
        }
        Err(TaskDagError::Config(format!(
            "template expression '{expr}' is neither an identifier nor a '$.' path"
        )))
    }
}

/// All marker expressions occurring in a string leaf.
pub fn markers_in(text: &str) -> Result<Vec<TemplateExpr>> {
    marker_re()
        .captures_iter(text)
        .map(|cap| TemplateExpr::parse(&cap[1]))
        .collect()
}

/// Whether the text contains any marker at all.
pub fn has_marker(text: &str) -> bool {
    marker_re().is_match(text)
}

/// All marker expressions anywhere under a JSON value.
pub fn markers_in_value(value: &Value) -> Result<Vec<TemplateExpr>> {
    let mut found = Vec::new();
    collect_markers(value, &mut found)?;
    Ok(found)
}

fn collect_markers(value: &Value, found: &mut Vec<TemplateExpr>) -> Result<()> {
    match value {
        Value::String(s) => found.extend(markers_in(s)?),
        Value::Array(items) => {
            for item in items {
                collect_markers(item, found)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_markers(item, found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Render a string leaf by substituting every marker.
///
/// A leaf that is exactly one marker is replaced by the resolved value
/// verbatim; markers embedded in a longer string interpolate textually
/// (strings splice as-is, other values as compact JSON).
pub fn render_str<F>(text: &str, resolve: &mut F) -> Result<Value>
where
    F: FnMut(&TemplateExpr) -> Result<Value>,
{
    if let Some(cap) = whole_marker_re().captures(text) {
        let expr = TemplateExpr::parse(&cap[1])?;
        return resolve(&expr);
    }

    let mut rendered = String::with_capacity(text.len());
    let mut last = 0;
    for cap in marker_re().captures_iter(text) {
        let whole = cap.get(0).ok_or_else(|| {
            TaskDagError::Config("template marker without a full match".to_string())
        })?;
        rendered.push_str(&text[last..whole.start()]);
        let expr = TemplateExpr::parse(&cap[1])?;
        let value = resolve(&expr)?;
        match value {
            Value::String(s) => rendered.push_str(&s),
            other => rendered.push_str(&other.to_string()),
        }
        last = whole.end();
    }
    rendered.push_str(&text[last..]);
    Ok(Value::String(rendered))
}
