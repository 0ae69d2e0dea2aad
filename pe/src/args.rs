//! Argument Value Resolver
//!
//! Builds the data a prompt is rendered against. Values are layered, later
//! layers winning:
//!
//! 1. `date`, the current local time
//! 2. environment defaults for required variables (`name` reads `NAME`)
//! 3. values supplied by the caller, optionally JSON-decoded
//!
//! Variable names are case-insensitive: caller keys are lower-cased to match
//! the names the resolver reports.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use tracing::debug;

/// Built-in variable holding the render time
pub const DATE_VARIABLE: &str = "date";

/// Format of the `date` variable, e.g. `2026-10-18 14:03:59`
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Reads an environment variable by name
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment lookup backed by the process environment
pub fn process_env() -> EnvLookup {
    Arc::new(|name| std::env::var(name).ok())
}

/// Environment lookup backed by a fixed map
pub fn static_env<I, K, V>(vars: I) -> EnvLookup
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let vars: HashMap<String, String> = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
    Arc::new(move |name| vars.get(name).cloned())
}

/// Name of the environment variable that provides a default for `variable`
pub fn env_var_name(variable: &str) -> String {
    variable.to_uppercase()
}

/// Format a timestamp the way the `date` variable renders it
pub fn format_date(now: DateTime<Local>) -> String {
    now.format(DATE_FORMAT).to_string()
}

/// Decode a caller-supplied string into a typed value
///
/// Valid JSON that is not itself a string is used as decoded. Everything
/// else, quoted strings included, stays the original text.
pub fn decode_argument(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) if !value.is_string() => value,
        _ => Value::String(raw.to_string()),
    }
}

/// Build the render data for one request
pub fn resolve_values(
    env_values: &BTreeMap<String, String>,
    supplied: &HashMap<String, String>,
    json_args: bool,
    now: DateTime<Local>,
) -> Map<String, Value> {
    debug!(
        env_count = env_values.len(),
        supplied_count = supplied.len(),
        %json_args,
        "resolve_values: called"
    );
    let mut data = Map::new();
    data.insert(DATE_VARIABLE.to_string(), Value::String(format_date(now)));

    for (name, value) in env_values {
        data.insert(name.clone(), Value::String(value.clone()));
    }

    for (name, raw) in supplied {
        let value = if json_args {
            decode_argument(raw)
        } else {
            Value::String(raw.clone())
        };
        data.insert(name.to_lowercase(), value);
    }

    data
}

/// Parse a `key=value` pair from the command line
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
