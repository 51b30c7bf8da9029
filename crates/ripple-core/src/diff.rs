use serde_json::{Map, Value};

/// Computes the minimal parts tree describing what changed between two
/// renders of the same template.
///
/// Defined only for trees of matching intended shape (produced by the same
/// template). A differing key count means the template took a different
/// conditional branch, in which case statics are re-sent even when their
/// content is unchanged; the engine never needs to understand *why* a
/// structure changed, only that key cardinality did.
///
/// An empty object means no change.
pub fn diff(old: &Value, new: &Value) -> Value {
    if old == new {
        return Value::Object(Map::new());
    }

    let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
        return new.clone();
    };

    let shape_changed = old_map.len() != new_map.len();
    let mut out = Map::new();

    for (key, new_value) in new_map {
        let Some(old_value) = old_map.get(key) else {
            out.insert(key.clone(), new_value.clone());
            continue;
        };

        match key.as_str() {
            "s" => {
                if let (Some(old_arr), Some(new_arr)) =
                    (old_value.as_array(), new_value.as_array())
                {
                    if old_arr.len() != new_arr.len()
                        || shape_changed
                        || diff_arrays(old_arr, new_arr)
                    {
                        out.insert(key.clone(), new_value.clone());
                    }
                } else if old_value != new_value {
                    out.insert(key.clone(), new_value.clone());
                }
            }
            "d" => {
                // A changed list retransmits in full; partial list diffing
                // is not performed.
                if let (Some(old_arr), Some(new_arr)) =
                    (old_value.as_array(), new_value.as_array())
                {
                    if diff_arrays(old_arr, new_arr) {
                        out.insert(key.clone(), new_value.clone());
                    }
                } else if old_value != new_value {
                    out.insert(key.clone(), new_value.clone());
                }
            }
            _ => match (old_value, new_value) {
                (Value::Object(_), Value::Object(_)) => {
                    let nested = diff(old_value, new_value);
                    let non_empty = nested
                        .as_object()
                        .map(|m| !m.is_empty())
                        .unwrap_or(true);
                    if non_empty {
                        out.insert(key.clone(), nested);
                    }
                }
                _ => {
                    if old_value != new_value {
                        out.insert(key.clone(), new_value.clone());
                    }
                }
            },
        }
    }

    Value::Object(out)
}

/// True when the two arrays differ: by length, or at any index pair —
/// strings by equality, nested arrays recursively, nested objects by a
/// non-empty [`diff`].
pub fn diff_arrays(old: &[Value], new: &[Value]) -> bool {
    if old.len() != new.len() {
        return true;
    }
    old.iter().zip(new.iter()).any(|(a, b)| match (a, b) {
        (Value::Array(x), Value::Array(y)) => diff_arrays(x, y),
        (Value::Object(_), Value::Object(_)) => diff(a, b)
            .as_object()
            .map(|m| !m.is_empty())
            .unwrap_or(true),
        _ => a != b,
    })
}
