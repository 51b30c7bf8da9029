use crate::components::RenderContext;
use crate::socket::Socket;
use ripple_core::LiveTemplate;
use serde_json::{Map, Value};

/// The application-supplied view driving one session.
///
/// The session state machine owns the call order: `mount` →
/// `handle_params` → `render` on join, then `handle_event` /
/// `handle_params` / `handle_info` followed by `render` for every
/// subsequent message. Assigns are opaque to the core; it only copies and
/// structurally diffs them.
pub trait LiveView: Send + Sync {
    fn mount(
        &self,
        params: &Map<String, Value>,
        session: &Map<String, Value>,
        socket: &mut Socket,
    ) -> Result<(), String>;

    /// Invoked on join and on every live navigation patch with the current
    /// URL.
    fn handle_params(&self, _url: &str, _socket: &mut Socket) -> Result<(), String> {
        Ok(())
    }

    fn render(&self, assigns: &Map<String, Value>, ctx: &mut RenderContext<'_>) -> LiveTemplate;

    fn handle_event(
        &self,
        _event: &str,
        _value: &Value,
        _socket: &mut Socket,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Invoked for internal messages: pub/sub deliveries and repeat timer
    /// ticks.
    fn handle_info(&self, _message: &Value, _socket: &mut Socket) -> Result<(), String> {
        Ok(())
    }
}

/// A reusable sub-component.
///
/// Rendered stateless (no caller id: mount → update → render on every call,
/// fragment inlined) or stateful (caller id present: mounted once, assigned
/// a stable component reference, re-sent only when its rendered output
/// changes).
pub trait LiveComponent: Send + Sync {
    fn mount(&self, _assigns: &mut Map<String, Value>) -> Result<(), String> {
        Ok(())
    }

    fn update(&self, params: &Value, assigns: &mut Map<String, Value>) -> Result<(), String>;

    fn render(&self, assigns: &Map<String, Value>) -> LiveTemplate;

    fn handle_event(
        &self,
        _event: &str,
        _value: &Value,
        _assigns: &mut Map<String, Value>,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Batch preload for same-typed sibling components, intended to fold N
    /// parameter sets into one data load. Nothing in the session control
    /// flow invokes this hook; it is documented surface only.
    fn preload(&self, params_batch: Vec<Value>) -> Vec<Value> {
        params_batch
    }
}
