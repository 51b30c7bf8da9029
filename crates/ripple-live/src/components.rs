use crate::view::LiveComponent;
use ripple_core::{diff, Dynamic};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// One tracked stateful component instance.
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub component_ref: i64,
    pub type_name: String,
    pub assigns: Map<String, Value>,
    /// The most recent full parts tree.
    pub parts: Value,
    /// What the client last received; `None` until the first flush.
    flushed: Option<Value>,
    pub dirty: bool,
}

/// Arena of stateful components, keyed by compound id
/// (component type ⊕ caller-supplied id).
///
/// Component references are assigned sequentially and stay stable for the
/// session's lifetime; records are never removed while the session lives.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    records: HashMap<String, ComponentRecord>,
    refs: HashMap<i64, String>,
    next_ref: i64,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            refs: HashMap::new(),
            next_ref: 1,
        }
    }

    /// Renders a component invocation into a template dynamic.
    ///
    /// Stateless (no caller id): mount → update → render every call, the
    /// fragment is inlined and nothing is recorded. Stateful: the first
    /// occurrence mounts and registers the record; later occurrences skip
    /// mount, re-run update → render and track dirtiness against the stored
    /// tree. Either way the caller receives the dynamic to splice into its
    /// own template.
    pub fn process(
        &mut self,
        component: &dyn LiveComponent,
        type_name: &str,
        caller_id: Option<&str>,
        params: &Value,
    ) -> Result<Dynamic, String> {
        let Some(caller_id) = caller_id else {
            let mut assigns = Map::new();
            component.mount(&mut assigns)?;
            component.update(params, &mut assigns)?;
            return Ok(Dynamic::Nested(component.render(&assigns)));
        };

        let compound_id = compound_id(type_name, caller_id);

        if let Some(record) = self.records.get_mut(&compound_id) {
            component.update(params, &mut record.assigns)?;
            record.rerender(component);
            return Ok(Dynamic::ComponentRef(record.component_ref));
        }

        let mut assigns = Map::new();
        component.mount(&mut assigns)?;
        component.update(params, &mut assigns)?;
        let parts = component.render(&assigns).render_parts(true);

        let component_ref = self.next_ref;
        self.next_ref += 1;
        self.refs.insert(component_ref, compound_id.clone());
        self.records.insert(
            compound_id,
            ComponentRecord {
                component_ref,
                type_name: type_name.to_string(),
                assigns,
                parts,
                flushed: None,
                dirty: true,
            },
        );

        Ok(Dynamic::ComponentRef(component_ref))
    }

    pub fn contains_ref(&self, component_ref: i64) -> bool {
        self.refs.contains_key(&component_ref)
    }

    pub fn type_of(&self, component_ref: i64) -> Option<&str> {
        self.refs
            .get(&component_ref)
            .and_then(|id| self.records.get(id))
            .map(|r| r.type_name.as_str())
    }

    /// Routes a client event to the component owning `component_ref` and
    /// re-renders it. The caller must have checked `contains_ref` first;
    /// events naming an unknown reference are dropped before this point.
    pub fn handle_event(
        &mut self,
        component: &dyn LiveComponent,
        component_ref: i64,
        event: &str,
        value: &Value,
    ) -> Result<(), String> {
        let record = self
            .refs
            .get(&component_ref)
            .and_then(|id| self.records.get_mut(id))
            .ok_or_else(|| format!("unknown component reference {component_ref}"))?;

        component.handle_event(event, value, &mut record.assigns)?;
        record.rerender(component);
        Ok(())
    }

    /// Collects every dirty record's parts-tree delta, keyed by component
    /// reference, and clears the dirty flags. First flushes carry the full
    /// tree; later ones carry the diff against what the client holds.
    pub fn take_dirty(&mut self) -> Map<String, Value> {
        let mut out = Map::new();
        for record in self.records.values_mut() {
            if !record.dirty {
                continue;
            }
            let payload = match &record.flushed {
                None => record.parts.clone(),
                Some(flushed) => diff(flushed, &record.parts),
            };
            record.flushed = Some(record.parts.clone());
            record.dirty = false;

            let empty = payload.as_object().map(|m| m.is_empty()).unwrap_or(false);
            if !empty {
                out.insert(record.component_ref.to_string(), payload);
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ComponentRecord {
    fn rerender(&mut self, component: &dyn LiveComponent) {
        let new_parts = component.render(&self.assigns).render_parts(true);
        let changed = diff(&self.parts, &new_parts)
            .as_object()
            .map(|m| !m.is_empty())
            .unwrap_or(true);
        self.parts = new_parts;
        self.dirty = self.dirty || changed;
    }
}

fn compound_id(type_name: &str, caller_id: &str) -> String {
    format!("{type_name}:{caller_id}")
}

/// Render-time handle giving a view access to its component registry.
///
/// Callback errors are captured rather than unwound so `render`
/// implementations stay plain; the session checks for a recorded error after
/// the render returns and treats it as a failed handler.
pub struct RenderContext<'a> {
    registry: &'a mut ComponentRegistry,
    components: &'a HashMap<String, Arc<dyn LiveComponent>>,
    error: Option<String>,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        registry: &'a mut ComponentRegistry,
        components: &'a HashMap<String, Arc<dyn LiveComponent>>,
    ) -> Self {
        Self {
            registry,
            components,
            error: None,
        }
    }

    /// Splices a component into the calling template. With a caller id the
    /// component is tracked in the registry and rendered as a stable integer
    /// reference; without one the fragment is inlined.
    pub fn component(
        &mut self,
        type_name: &str,
        caller_id: Option<&str>,
        params: Value,
    ) -> Dynamic {
        let Some(instance) = self.components.get(type_name).cloned() else {
            self.error = Some(format!("component type '{type_name}' is not registered"));
            return Dynamic::Literal(Value::String(String::new()));
        };

        match self
            .registry
            .process(instance.as_ref(), type_name, caller_id, &params)
        {
            Ok(dynamic) => dynamic,
            Err(e) => {
                self.error = Some(e);
                Dynamic::Literal(Value::String(String::new()))
            }
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }
}
