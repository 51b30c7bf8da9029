use serde_json::{json, Map, Value};

/// One dynamic slot of a template, decided once at construction.
///
/// The tag is fixed when the tree is built, so rendering switches on it
/// instead of inspecting runtime types.
#[derive(Debug, Clone, PartialEq)]
pub enum Dynamic {
    /// A literal value, HTML-escaped and stringified at render time.
    Literal(Value),
    /// A nested template rendered as a nested parts tree with its own statics.
    Nested(LiveTemplate),
    /// An ordered list of templates sharing identical statics. The shared
    /// statics are transmitted once, so N repeated items cost O(1) statics.
    List(Vec<LiveTemplate>),
    /// A placeholder for a registered stateful component. The component's own
    /// parts tree travels separately under the reply's `"c"` key.
    ComponentRef(i64),
}

impl From<Value> for Dynamic {
    fn from(value: Value) -> Self {
        Dynamic::Literal(value)
    }
}

impl From<&str> for Dynamic {
    fn from(value: &str) -> Self {
        Dynamic::Literal(Value::String(value.to_string()))
    }
}

impl From<LiveTemplate> for Dynamic {
    fn from(template: LiveTemplate) -> Self {
        Dynamic::Nested(template)
    }
}

impl From<Vec<LiveTemplate>> for Dynamic {
    fn from(items: Vec<LiveTemplate>) -> Self {
        Dynamic::List(items)
    }
}

/// An immutable template tree: literal text fragments ("statics")
/// interleaved with dynamic slots.
///
/// Invariant: `statics.len() == dynamics.len() + 1`, enforced at
/// construction. A template is owned by the render call that created it and
/// discarded after serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveTemplate {
    statics: Vec<String>,
    dynamics: Vec<Dynamic>,
}

impl LiveTemplate {
    pub fn new(statics: Vec<String>, dynamics: Vec<Dynamic>) -> Self {
        assert_eq!(
            statics.len(),
            dynamics.len() + 1,
            "template requires exactly one more static than dynamics"
        );
        Self { statics, dynamics }
    }

    /// A template with a single static fragment and no dynamics.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            statics: vec![content.into()],
            dynamics: Vec::new(),
        }
    }

    pub fn statics(&self) -> &[String] {
        &self.statics
    }

    pub fn dynamics(&self) -> &[Dynamic] {
        &self.dynamics
    }

    /// Serializes the template into its compact wire form.
    ///
    /// Dynamic slots become numeric-string keys `"0"`, `"1"`, … holding an
    /// escaped literal, a nested parts tree (statics always included), a
    /// component-reference integer, or the list encoding
    /// `{d: [[..], [..]], s: shared statics}`. The top-level `"s"` key is
    /// attached only when `include_statics` is true: full replies carry
    /// statics, incremental diffs re-send them only when the shape changed.
    pub fn render_parts(&self, include_statics: bool) -> Value {
        let mut out = Map::new();

        if self.dynamics.is_empty() {
            out.insert("s".to_string(), statics_value(&self.statics));
            return Value::Object(out);
        }

        for (i, dynamic) in self.dynamics.iter().enumerate() {
            out.insert(i.to_string(), render_dynamic(dynamic));
        }

        if include_statics {
            out.insert("s".to_string(), statics_value(&self.statics));
        }

        Value::Object(out)
    }

    /// Flattens the template into a plain HTML string.
    ///
    /// Used for the initial non-connected render. Component references
    /// contribute nothing here; their fragments are shipped over the live
    /// connection once the client joins.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for (i, fragment) in self.statics.iter().enumerate() {
            out.push_str(fragment);
            if let Some(dynamic) = self.dynamics.get(i) {
                match dynamic {
                    Dynamic::Literal(v) => out.push_str(&escape_html(&value_to_string(v))),
                    Dynamic::Nested(t) => out.push_str(&t.to_html()),
                    Dynamic::List(items) => {
                        for item in items {
                            out.push_str(&item.to_html());
                        }
                    }
                    Dynamic::ComponentRef(_) => {}
                }
            }
        }
        out
    }

    /// The dynamic slot values of one list item, without statics. Shared
    /// statics travel once for the whole list.
    fn render_dynamics_row(&self) -> Vec<Value> {
        self.dynamics.iter().map(render_dynamic).collect()
    }
}

fn render_dynamic(dynamic: &Dynamic) -> Value {
    match dynamic {
        Dynamic::Literal(v) => Value::String(escape_html(&value_to_string(v))),
        Dynamic::Nested(t) => t.render_parts(true),
        Dynamic::ComponentRef(cid) => json!(cid),
        Dynamic::List(items) => {
            let rows: Vec<Value> = items
                .iter()
                .map(|item| Value::Array(item.render_dynamics_row()))
                .collect();
            let shared = items
                .first()
                .map(|item| statics_value(&item.statics))
                .unwrap_or_else(|| Value::Array(Vec::new()));
            json!({ "d": rows, "s": shared })
        }
    }
}

fn statics_value(statics: &[String]) -> Value {
    Value::Array(statics.iter().cloned().map(Value::String).collect())
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => v.to_string(),
    }
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
