use log::debug;
use serde_json::{json, Map, Value};

/// Top-level category names every fresh inventory starts with.
pub const MAIN_TYPES: [&str; 6] = ["原材料", "半成品", "成品", "包装材料", "辅料", "其他"];

/// The document a new account, or a freshly-seeded public store, begins with:
/// an empty goods list plus the default category taxonomy.
pub fn default_document() -> Value {
    let sub_types: Map<String, Value> = MAIN_TYPES
        .iter()
        .map(|name| (name.to_string(), json!([])))
        .collect();

    json!({
        "goodsList": [],
        "typeData": {
            "mainTypes": MAIN_TYPES,
            "subTypes": sub_types,
        },
    })
}

/// Whether a body field counts as supplied. The client treats `null`,
/// `false`, `0` and `""` the same as an absent field.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(_) => true,
    }
}

/// Lenient body decode: an empty body, a malformed one, or one that isn't
/// a JSON object all become `{}`.
pub fn parse_body(bytes: &[u8]) -> Map<String, Value> {
    if bytes.is_empty() {
        return Map::new();
    }

    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            debug!("ignoring non-object body: {other}");
            Map::new()
        }
        Err(e) => {
            debug!("ignoring malformed body: {e}");
            Map::new()
        }
    }
}
