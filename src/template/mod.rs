//! Variable template engine.
//!
//! Expands `<name>` placeholders in strings and, recursively, in structured
//! values, from an ordered variable mapping. This is the substitution layer
//! that feeds resolved configuration into every fetch and build operation,
//! so its semantics are deliberately strict:
//!
//! - `<<` and `>>` collapse to a single literal bracket (an escape, not a
//!   lookup).
//! - A lone `>`, or a `<` with no closing `>`, is a malformed-placeholder
//!   error.
//! - Placeholder names are matched case-insensitively. A leading `.` marks
//!   the lookup optional: `<.name>` disappears silently when `name` is
//!   undefined, while `<name>` raises an undefined-variable error.
//! - Substituted text is not rescanned.
//!
//! Object keys may carry `|condition` suffixes evaluated right-to-left
//! (`|!name` negates); an entry whose condition chain evaluates false is
//! dropped from the output entirely. When two entries expand to the same
//! key, objects merge key-wise (right wins per key), arrays concatenate,
//! and anything else is replaced by the right value.

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::QuarryError;

/// Maximum nesting depth for value expansion.
///
/// Matches the parser's document depth limit so a pathological metadata
/// file cannot blow the stack during expansion.
pub const MAX_EXPANSION_DEPTH: usize = 200;

/// An ordered variable mapping with case-insensitive lookup.
///
/// Keys preserve their insertion spelling for display, but lookups ignore
/// case. Re-inserting a key overwrites the value while keeping the key's
/// original position, and composing two maps lets the later operand win on
/// collision.
#[derive(Debug, Clone, Default)]
pub struct VarMap {
    // keyed by the lowercased name; the entry keeps the original spelling
    entries: IndexMap<String, (String, String)>,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a variable.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        self.entries.insert(key.to_lowercase(), (key, value));
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_lowercase()).map(|(_, v)| v.as_str())
    }

    /// True when `name` is defined (used by `|condition` key suffixes).
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    /// Merge `other` into `self`; `other` wins on key collision.
    pub fn extend(&mut self, other: &VarMap) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Ordered union of two maps; the right operand wins on collision.
    #[must_use]
    pub fn merged(&self, other: &VarMap) -> VarMap {
        let mut result = self.clone();
        result.extend(other);
        result
    }

    /// Derive a copy with every key wrapped in `prefix`/`suffix`.
    ///
    /// Used to scope directory variables per architecture/configuration
    /// (`lib_dir` becomes `lib_dir_x64_debug`).
    #[must_use]
    pub fn transform(&self, prefix: &str, suffix: &str) -> VarMap {
        let mut result = VarMap::new();
        for (key, value) in self.iter() {
            result.insert(format!("{prefix}{key}{suffix}"), value);
        }
        result
    }

    /// Export as `PREFIX_NAME=value` pairs for child-process environments.
    pub fn to_env(&self, prefix: &str) -> Vec<(String, String)> {
        self.iter()
            .map(|(key, value)| (format!("{prefix}{}", key.to_uppercase()), value.to_string()))
            .collect()
    }

    /// Iterate `(original_key, value)` pairs in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expand a string against this map. See [`expand_str`].
    pub fn expand_str(&self, input: &str) -> Result<String, QuarryError> {
        expand_str(self, input)
    }

    /// Expand a structured value against this map. See [`expand_value`].
    pub fn expand(&self, value: &Value) -> Result<Value, QuarryError> {
        expand_value(self, value)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VarMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = VarMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Expand `<name>` placeholders in a single string.
pub fn expand_str(vars: &VarMap, input: &str) -> Result<String, QuarryError> {
    // fast path for strings without any bracket characters
    if !input.contains(['<', '>']) {
        return Ok(input.to_string());
    }

    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '<' if chars.get(i + 1) == Some(&'<') => {
                out.push('<');
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'>') => {
                out.push('>');
                i += 2;
            }
            '>' => {
                return Err(QuarryError::MalformedPlaceholder { input: input.to_string() });
            }
            '<' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '>')
                    .map(|p| i + 1 + p)
                    .ok_or_else(|| QuarryError::MalformedPlaceholder {
                        input: input.to_string(),
                    })?;
                let name: String =
                    chars[i + 1..end].iter().collect::<String>().to_lowercase();
                let (name, optional) = match name.strip_prefix('.') {
                    Some(stripped) => (stripped.to_string(), true),
                    None => (name, false),
                };
                match vars.get(&name) {
                    Some(value) => out.push_str(value),
                    None if optional => {}
                    None => return Err(QuarryError::UndefinedVariable { name }),
                }
                i = end + 1;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Expand a structured value: every leaf string is expanded, object keys
/// have their `|condition` suffixes evaluated, and colliding entries merge.
pub fn expand_value(vars: &VarMap, value: &Value) -> Result<Value, QuarryError> {
    expand_at_depth(vars, value, 0)
}

fn expand_at_depth(vars: &VarMap, value: &Value, depth: usize) -> Result<Value, QuarryError> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(QuarryError::ExpansionTooDeep { limit: MAX_EXPANSION_DEPTH });
    }
    match value {
        Value::String(s) => Ok(Value::String(expand_str(vars, s)?)),
        Value::Array(items) => {
            let mut result = Vec::with_capacity(items.len());
            for item in items {
                result.push(expand_at_depth(vars, item, depth + 1)?);
            }
            Ok(Value::Array(result))
        }
        Value::Object(obj) => {
            let mut result = Map::new();
            for (key, entry) in obj {
                let Some(key) = eval_key(vars, key) else {
                    continue;
                };
                if key.is_empty() {
                    continue;
                }
                let expanded = expand_at_depth(vars, entry, depth + 1)?;
                merge_entry(&mut result, key, expanded);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

/// Evaluate the `|condition` suffix chain of an object key.
///
/// The rightmost segment is tested and stripped first; evaluation proceeds
/// leftward only while each stripped segment holds. `None` means the entry
/// is dropped.
fn eval_key(vars: &VarMap, key: &str) -> Option<String> {
    match key.rfind('|') {
        None => Some(key.to_string()),
        Some(p) => {
            let test = &key[p + 1..];
            let (test, invert) = match test.strip_prefix('!') {
                Some(stripped) => (stripped, true),
                None => (test, false),
            };
            // logical xor of definedness and negation
            if vars.contains(test) != invert {
                eval_key(vars, &key[..p])
            } else {
                None
            }
        }
    }
}

fn merge_entry(object: &mut Map<String, Value>, key: String, value: Value) {
    match object.get_mut(&key) {
        Some(existing) => {
            let merged = match (&*existing, &value) {
                (Value::Object(left), Value::Object(right)) => {
                    Value::Object(merge_objects(left, right))
                }
                (Value::Array(left), Value::Array(right)) => {
                    Value::Array(merge_arrays(left, right))
                }
                _ => value,
            };
            *existing = merged;
        }
        None => {
            object.insert(key, value);
        }
    }
}

/// Key-wise union of two objects; the right operand wins per key.
///
/// Exposed standalone because variable-set composition reuses it.
pub fn merge_objects(left: &Map<String, Value>, right: &Map<String, Value>) -> Map<String, Value> {
    let mut result = left.clone();
    for (key, value) in right {
        result.insert(key.clone(), value.clone());
    }
    result
}

/// Concatenation of two arrays, left then right.
pub fn merge_arrays(left: &[Value], right: &[Value]) -> Vec<Value> {
    let mut result = left.to_vec();
    result.extend(right.iter().cloned());
    result
}

/// Variables recomputed fresh on every project load: the current UTC date
/// and time plus a random token usable in scratch paths.
pub fn dynamic_vars() -> VarMap {
    let now = Utc::now();
    let mut vars = VarMap::new();
    vars.insert("random", uuid::Uuid::new_v4().simple().to_string());
    vars.insert("date", now.format("%Y-%m-%d").to_string());
    vars.insert("time", now.format("%H:%M:%S").to_string());
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> VarMap {
        pairs.iter().map(|&(k, v)| (k, v)).collect()
    }

    #[test]
    fn plain_substitution() {
        let v = vars(&[("name", "zlib"), ("version", "1.2.11")]);
        assert_eq!(
            expand_str(&v, "<name>-<version>.tar.gz").unwrap(),
            "zlib-1.2.11.tar.gz"
        );
    }

    #[test]
    fn string_without_brackets_is_unchanged() {
        let v = VarMap::new();
        assert_eq!(expand_str(&v, "no placeholders here").unwrap(), "no placeholders here");
    }

    #[test]
    fn doubled_brackets_escape() {
        let v = VarMap::new();
        assert_eq!(expand_str(&v, "a<<b>>c").unwrap(), "a<b>c");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let v = vars(&[("Name", "zlib")]);
        assert_eq!(expand_str(&v, "<NAME>").unwrap(), "zlib");
        assert_eq!(expand_str(&v, "<name>").unwrap(), "zlib");
    }

    #[test]
    fn optional_placeholder_vanishes_on_miss() {
        let v = VarMap::new();
        assert_eq!(expand_str(&v, "<.unset>value").unwrap(), "value");
    }

    #[test]
    fn optional_placeholder_substitutes_on_hit() {
        let v = vars(&[("set", "x")]);
        assert_eq!(expand_str(&v, "<.set>value").unwrap(), "xvalue");
    }

    #[test]
    fn required_miss_is_an_error() {
        let v = VarMap::new();
        let err = expand_str(&v, "<unset>value").unwrap_err();
        assert!(matches!(err, QuarryError::UndefinedVariable { name } if name == "unset"));
    }

    #[test]
    fn stray_closing_bracket_is_malformed() {
        let v = VarMap::new();
        assert!(matches!(
            expand_str(&v, "a>b").unwrap_err(),
            QuarryError::MalformedPlaceholder { .. }
        ));
    }

    #[test]
    fn unterminated_placeholder_is_malformed() {
        let v = VarMap::new();
        assert!(matches!(
            expand_str(&v, "a<b").unwrap_err(),
            QuarryError::MalformedPlaceholder { .. }
        ));
    }

    #[test]
    fn substituted_text_is_not_rescanned() {
        let v = vars(&[("a", "<b>"), ("b", "nope")]);
        assert_eq!(expand_str(&v, "<a>").unwrap(), "<b>");
    }

    #[test]
    fn conditional_key_kept_when_defined() {
        let v = vars(&[("flag", "1")]);
        let out = expand_value(&v, &json!({"opt|flag": "x"})).unwrap();
        assert_eq!(out, json!({"opt": "x"}));
    }

    #[test]
    fn conditional_key_dropped_when_undefined() {
        let v = VarMap::new();
        let out = expand_value(&v, &json!({"opt|flag": "x"})).unwrap();
        assert_eq!(out, json!({}));
    }

    #[test]
    fn negated_conditional_key() {
        let defined = vars(&[("flag", "1")]);
        let out = expand_value(&defined, &json!({"opt|!flag": "x"})).unwrap();
        assert_eq!(out, json!({}));

        let out = expand_value(&VarMap::new(), &json!({"opt|!flag": "x"})).unwrap();
        assert_eq!(out, json!({"opt": "x"}));
    }

    #[test]
    fn chained_conditions_evaluate_right_to_left() {
        let v = vars(&[("a", "1"), ("b", "1")]);
        let out = expand_value(&v, &json!({"opt|a|b": "x"})).unwrap();
        assert_eq!(out, json!({"opt": "x"}));

        let v = vars(&[("b", "1")]);
        let out = expand_value(&v, &json!({"opt|a|b": "x"})).unwrap();
        assert_eq!(out, json!({}));
    }

    #[test]
    fn colliding_arrays_concatenate() {
        // "a|x" and "a|!y" both resolve to key "a"
        let v = vars(&[("x", "1")]);
        let out = expand_value(&v, &json!({"a|x": ["1"], "a|!y": ["2"]})).unwrap();
        assert_eq!(out, json!({"a": ["1", "2"]}));
    }

    #[test]
    fn colliding_objects_union_right_wins() {
        let v = vars(&[("x", "1")]);
        let input = json!({"a|x": {"k": "old", "only_left": "l"}, "a": {"k": "new"}});
        let out = expand_value(&v, &input).unwrap();
        assert_eq!(out, json!({"a": {"k": "new", "only_left": "l"}}));
    }

    #[test]
    fn colliding_scalars_replace() {
        let v = vars(&[("x", "1")]);
        let out = expand_value(&v, &json!({"a|x": "first", "a": "second"})).unwrap();
        assert_eq!(out, json!({"a": "second"}));
    }

    #[test]
    fn non_string_leaves_pass_through() {
        let v = VarMap::new();
        let input = json!({"n": 42, "f": 1.5, "b": true, "z": null});
        assert_eq!(expand_value(&v, &input).unwrap(), input);
    }

    #[test]
    fn nested_values_expand_recursively() {
        let v = vars(&[("dir", "/out")]);
        let input = json!({"paths": ["<dir>/a", {"inner": "<dir>/b"}]});
        let out = expand_value(&v, &input).unwrap();
        assert_eq!(out, json!({"paths": ["/out/a", {"inner": "/out/b"}]}));
    }

    #[test]
    fn expansion_depth_is_guarded() {
        let mut value = json!("leaf");
        for _ in 0..(MAX_EXPANSION_DEPTH + 2) {
            value = Value::Array(vec![value]);
        }
        let err = expand_value(&VarMap::new(), &value).unwrap_err();
        assert!(matches!(err, QuarryError::ExpansionTooDeep { .. }));
    }

    #[test]
    fn compose_later_operand_wins() {
        let left = vars(&[("a", "1"), ("b", "1")]);
        let right = vars(&[("b", "2"), ("c", "2")]);
        let merged = left.merged(&right);
        assert_eq!(merged.get("a"), Some("1"));
        assert_eq!(merged.get("b"), Some("2"));
        assert_eq!(merged.get("c"), Some("2"));
        // first-seen order is preserved for display
        let keys: Vec<_> = merged.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn transform_wraps_keys() {
        let v = vars(&[("lib_dir", "/x")]);
        let t = v.transform("", "_x64_debug");
        assert_eq!(t.get("lib_dir_x64_debug"), Some("/x"));
    }

    #[test]
    fn env_export_uppercases() {
        let v = vars(&[("lib_dir", "/x")]);
        let env = v.to_env("QUARRY_");
        assert_eq!(env, vec![("QUARRY_LIB_DIR".to_string(), "/x".to_string())]);
    }

    #[test]
    fn dynamic_vars_present() {
        let v = dynamic_vars();
        assert!(v.contains("random"));
        assert!(v.contains("date"));
        assert!(v.contains("time"));
        // date is %Y-%m-%d
        assert_eq!(v.get("date").unwrap().len(), 10);
    }
}
