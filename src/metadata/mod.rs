//! Module metadata documents.
//!
//! Each module is declared by one structured document at
//! `modules/<name>.json`. The format is JSON with `//` and `/* */`
//! comments; parsing strips comments (string-aware) and hands the rest to
//! `serde_json` with ordered objects. The rest of the crate consumes the
//! documents purely as [`serde_json::Value`] trees.
//!
//! Also home to the small value helpers (`flatten`, `join_list`, ...) the
//! fetchers and build adapters use to read loosely-typed fields.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;

use crate::core::QuarryError;
use crate::env::Environment;

/// Path of the metadata document for `name`.
pub fn module_path(env: &Environment, name: &str) -> PathBuf {
    env.modules_dir.join(format!("{name}.json"))
}

/// True when a metadata document exists for `name`.
pub fn is_module(env: &Environment, name: &str) -> bool {
    module_path(env, name).is_file()
}

/// Load and parse the metadata document for `name`.
pub fn load_module(env: &Environment, name: &str) -> Result<Value, QuarryError> {
    let path = module_path(env, name);
    if !path.is_file() {
        return Err(QuarryError::ModuleNotFound { name: name.to_string() });
    }
    let text = fs::read_to_string(&path)
        .map_err(|e| QuarryError::fs(format!("can't read module file \"{}\"", path.display()), e))?;
    parse_document(&text)
        .map_err(|e| QuarryError::MetadataParse { path, reason: e.to_string() })
}

/// All declared module names (sorted document stems).
pub fn list_modules(env: &Environment) -> Result<Vec<String>, QuarryError> {
    let mut names = Vec::new();
    let entries = fs::read_dir(&env.modules_dir).map_err(|e| {
        QuarryError::fs(format!("can't read directory \"{}\"", env.modules_dir.display()), e)
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| {
            QuarryError::fs(format!("can't read directory \"{}\"", env.modules_dir.display()), e)
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            if let Some(stem) = path.file_stem() {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Parse a metadata document (JSON with comments).
pub fn parse_document(text: &str) -> serde_json::Result<Value> {
    serde_json::from_str(&strip_comments(text))
}

/// Pretty-print a value for `data`-style inspection output.
pub fn to_pretty_string(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Replace `//` and `/* */` comments with whitespace, leaving strings and
/// newlines intact so parse errors keep meaningful positions.
fn strip_comments(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Str,
        StrEscape,
        Line,
        Block,
    }
    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '"' => {
                    state = State::Str;
                    out.push(c);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::Line;
                    out.push_str("  ");
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::Block;
                    out.push_str("  ");
                }
                _ => out.push(c),
            },
            State::Str => {
                out.push(c);
                match c {
                    '\\' => state = State::StrEscape,
                    '"' => state = State::Code,
                    _ => {}
                }
            }
            State::StrEscape => {
                out.push(c);
                state = State::Str;
            }
            State::Line => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::Block => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                    out.push_str("  ");
                } else if c == '\n' {
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
        }
    }
    out
}

/// The string form of a value: strings verbatim, everything else rendered
/// as compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A string field, or `default` when missing or not a string.
pub fn str_or<'a>(value: &'a Value, default: &'a str) -> &'a str {
    value.as_str().unwrap_or(default)
}

/// Flatten a value into its leaf elements: arrays and objects fan out
/// recursively, null disappears, scalars stand alone.
pub fn flatten(value: &Value) -> Vec<&Value> {
    let mut out = Vec::new();
    collect_leaves(value, &mut out);
    out
}

fn collect_leaves<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                collect_leaves(item, out);
            }
        }
        Value::Object(obj) => {
            for item in obj.values() {
                collect_leaves(item, out);
            }
        }
        leaf => out.push(leaf),
    }
}

/// Flatten to rendered strings, dropping empties.
pub fn flatten_strings(value: &Value) -> Vec<String> {
    flatten(value).iter().map(|v| value_to_string(v)).filter(|s| !s.is_empty()).collect()
}

/// Join a list-like value for command lines: a string passes through, an
/// array joins its rendered elements, an object joins `key{infix}value`
/// pairs. Anything else is empty.
pub fn join_list(value: &Value, delimiter: &str, prefix: &str, infix: &str, postfix: &str) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| format!("{prefix}{}{postfix}", value_to_string(v)))
            .collect::<Vec<_>>()
            .join(delimiter),
        Value::Object(obj) => obj
            .iter()
            .map(|(k, v)| format!("{prefix}{k}{infix}{}{postfix}", value_to_string(v)))
            .collect::<Vec<_>>()
            .join(delimiter),
        _ => String::new(),
    }
}

/// Loose boolean reading for flags like `insource` and `cmakeinstall`.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0 || n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
