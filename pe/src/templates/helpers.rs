use handlebars::handlebars_helper;
use serde_json::{Map, Value};

/// Build an object from alternating key/value arguments
///
/// `{{> _header (dict "role" role "tone" "formal")}}` passes a fresh context
/// to a partial. Non-string keys are stringified; a trailing key without a
/// value maps to null.
pub(crate) fn build_dict(args: &[&Value]) -> Value {
    let mut map = Map::new();
    for pair in args.chunks(2) {
        let key = match pair[0] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let value = pair.get(1).map(|v| (*v).clone()).unwrap_or(Value::Null);
        map.insert(key, value);
    }
    Value::Object(map)
}

handlebars_helper!(dict: |*args| build_dict(&args));
