use crate::components::{ComponentRegistry, RenderContext};
use crate::protocol::{
    decode_event_value, EventPayload, JoinPayload, LivePatchPayload, WireMessage, EVENT_DIFF,
    EVENT_EVENT, EVENT_HEARTBEAT, EVENT_JOIN, EVENT_LEAVE, EVENT_LIVE_PATCH, EVENT_LIVE_REDIRECT,
};
use crate::pubsub::PubSub;
use crate::serializer::SessionSerializer;
use crate::socket::{Socket, SocketCommand, TransportMode};
use crate::transport::Transport;
use crate::view::{LiveComponent, LiveView};
use ripple_core::diff;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CSRF_TOKEN_KEY: &str = "_csrf_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unjoined,
    Joined,
    Terminated,
}

/// One unit of session work: a decoded client frame or an internal message
/// from a subscription callback or repeat timer.
#[derive(Debug)]
pub enum Envelope {
    Client(WireMessage),
    Info(Value),
}

/// The per-connection protocol state machine.
///
/// Owns the view, its socket, the component registry and the cached parts
/// tree. Every message — client frame, pub/sub delivery, timer tick — enters
/// through the session's inbox and is processed to completion before the
/// next one starts, so handlers never observe each other's partial
/// mutations.
pub struct LiveSession {
    status: SessionStatus,
    topic: String,
    join_id: Option<String>,
    connection_id: Option<String>,
    view: Arc<dyn LiveView>,
    components: HashMap<String, Arc<dyn LiveComponent>>,
    registry: ComponentRegistry,
    socket: Socket,
    cached_parts: Option<Value>,
    serializer: Arc<dyn SessionSerializer>,
    transport: Box<dyn Transport>,
    pubsub: Arc<PubSub>,
    subscriptions: HashMap<String, u64>,
    timers: Vec<tokio::task::JoinHandle<()>>,
    pending_events: Vec<Value>,
    pending_pushes: Vec<WireMessage>,
    inbox_tx: mpsc::UnboundedSender<Envelope>,
    inbox_rx: mpsc::UnboundedReceiver<Envelope>,
}

impl LiveSession {
    pub fn new(
        view: Arc<dyn LiveView>,
        serializer: Arc<dyn SessionSerializer>,
        transport: Box<dyn Transport>,
        pubsub: Arc<PubSub>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            status: SessionStatus::Unjoined,
            topic: String::new(),
            join_id: None,
            connection_id: None,
            view,
            components: HashMap::new(),
            registry: ComponentRegistry::new(),
            socket: Socket::new(TransportMode::WebSocket),
            cached_parts: None,
            serializer,
            transport,
            pubsub,
            subscriptions: HashMap::new(),
            timers: Vec::new(),
            pending_events: Vec::new(),
            pending_pushes: Vec::new(),
            inbox_tx,
            inbox_rx,
        }
    }

    /// Registers a component type under the name views use to request it.
    pub fn register_component(
        &mut self,
        type_name: impl Into<String>,
        component: Arc<dyn LiveComponent>,
    ) {
        self.components.insert(type_name.into(), component);
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// The client's join reference, set once the join is accepted.
    pub fn join_id(&self) -> Option<&str> {
        self.join_id.as_deref()
    }

    /// The connection identifier carried in the join topic
    /// (the part after `lv:`), set once the join is accepted.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn is_terminated(&self) -> bool {
        self.status == SessionStatus::Terminated
    }

    /// Decodes a raw client frame, enqueues it, and drains the inbox.
    /// Malformed frames are logged and dropped without touching state.
    pub fn handle_frame(&mut self, raw: &str) {
        match WireMessage::decode(raw) {
            Ok(msg) => {
                let _ = self.inbox_tx.send(Envelope::Client(msg));
                self.pump();
            }
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    /// Enqueues an internal message for `handle_info` and drains the inbox.
    pub fn deliver_info(&mut self, message: Value) {
        let _ = self.inbox_tx.send(Envelope::Info(message));
        self.pump();
    }

    /// Waits for the next envelope from a subscription callback or timer.
    /// Adapters select over this alongside the transport's inbound half.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbox_rx.recv().await
    }

    /// Processes one envelope, then drains whatever else queued up behind it.
    pub fn process(&mut self, envelope: Envelope) {
        self.dispatch(envelope);
        self.pump();
    }

    fn pump(&mut self) {
        while let Ok(envelope) = self.inbox_rx.try_recv() {
            self.dispatch(envelope);
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        if self.status == SessionStatus::Terminated {
            debug!("session terminated, ignoring message");
            return;
        }
        match envelope {
            Envelope::Client(msg) => self.on_client(msg),
            Envelope::Info(message) => self.on_info(message),
        }
    }

    fn on_client(&mut self, msg: WireMessage) {
        match msg.event.as_str() {
            EVENT_JOIN => self.on_join(msg),
            EVENT_HEARTBEAT => self.on_heartbeat(msg),
            EVENT_EVENT => self.on_event(msg),
            EVENT_LIVE_PATCH => self.on_live_patch(msg),
            EVENT_LEAVE => self.teardown(),
            other => warn!(event = other, "dropping unknown event"),
        }
    }

    fn on_join(&mut self, msg: WireMessage) {
        if self.status != SessionStatus::Unjoined {
            warn!("dropping join for already-joined session");
            return;
        }

        let payload: JoinPayload = match serde_json::from_value(msg.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "rejecting join with malformed payload");
                return;
            }
        };

        // Both rejection paths are deliberately reply-free: the client is
        // left hanging rather than told why.
        let session = match self.serializer.deserialize(&payload.session) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "rejecting join: session blob did not deserialize");
                return;
            }
        };
        let expected = session.get(CSRF_TOKEN_KEY).and_then(Value::as_str);
        let provided = payload.params.get(CSRF_TOKEN_KEY).and_then(Value::as_str);
        if expected.is_none() || expected != provided {
            warn!("rejecting join: csrf token mismatch");
            return;
        }

        if let Some(flash) = payload.flash.clone() {
            self.socket.merge_flash(flash);
        }

        if let Err(e) = self
            .view
            .clone()
            .mount(&payload.params, &session, &mut self.socket)
        {
            warn!(error = %e, "mount failed, dropping join");
            return;
        }
        self.drain_commands();

        if let Some(url) = payload.url.as_deref().or(payload.redirect.as_deref()) {
            let url = url.to_string();
            if let Err(e) = self.view.clone().handle_params(&url, &mut self.socket) {
                warn!(error = %e, "handle_params failed, dropping join");
                return;
            }
            self.drain_commands();
        }

        let parts = match self.render_view() {
            Ok(parts) => parts,
            Err(e) => {
                warn!(error = %e, "render failed, dropping join");
                return;
            }
        };
        self.cached_parts = Some(parts.clone());
        let rendered = self.decorate(parts);

        self.topic = msg.topic.clone();
        self.join_id = msg.join_ref.clone();
        self.connection_id = Some(
            msg.topic
                .split_once(':')
                .map(|(_, id)| id.to_string())
                .unwrap_or_else(|| msg.topic.clone()),
        );
        let reply = WireMessage::reply_ok(&msg, json!({ "rendered": rendered }));
        if !self.send(&reply) {
            return;
        }
        self.status = SessionStatus::Joined;
        self.flush_pushes();
        self.socket.reset_temporaries();
    }

    fn on_heartbeat(&mut self, msg: WireMessage) {
        let reply = WireMessage::reply_ok(&msg, json!({}));
        self.send(&reply);
    }

    fn on_event(&mut self, msg: WireMessage) {
        if self.status != SessionStatus::Joined {
            warn!("dropping event before join");
            return;
        }

        let payload: EventPayload = match serde_json::from_value(msg.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed event payload");
                return;
            }
        };
        let value = match decode_event_value(&payload.event_type, payload.value) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping undecodable event value");
                return;
            }
        };

        let diff = if let Some(component_ref) = payload.cid {
            // Component-targeted: only that component re-renders; the root
            // tree is untouched.
            if !self.registry.contains_ref(component_ref) {
                debug!(component_ref, "dropping event for unknown component reference");
                return;
            }
            let Some(component) = self
                .registry
                .type_of(component_ref)
                .and_then(|name| self.components.get(name).cloned())
            else {
                debug!(component_ref, "dropping event for unregistered component type");
                return;
            };
            if let Err(e) = self.registry.handle_event(
                component.as_ref(),
                component_ref,
                &payload.event,
                &value,
            ) {
                warn!(error = %e, "component event handler failed, dropping");
                return;
            }
            self.decorate(json!({}))
        } else {
            if let Err(e) = self
                .view
                .clone()
                .handle_event(&payload.event, &value, &mut self.socket)
            {
                warn!(error = %e, "event handler failed, dropping");
                return;
            }
            self.drain_commands();
            match self.rerender_diff() {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(error = %e, "render failed, dropping event");
                    return;
                }
            }
        };

        let reply = WireMessage::reply_ok(&msg, json!({ "diff": diff }));
        if self.send(&reply) {
            self.flush_pushes();
            self.socket.reset_temporaries();
        }
    }

    fn on_live_patch(&mut self, msg: WireMessage) {
        if self.status != SessionStatus::Joined {
            warn!("dropping live_patch before join");
            return;
        }
        let payload: LivePatchPayload = match serde_json::from_value(msg.payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed live_patch payload");
                return;
            }
        };

        if let Err(e) = self
            .view
            .clone()
            .handle_params(&payload.url, &mut self.socket)
        {
            warn!(error = %e, "handle_params failed, dropping live_patch");
            return;
        }
        self.drain_commands();

        let diff = match self.rerender_diff() {
            Ok(diff) => diff,
            Err(e) => {
                warn!(error = %e, "render failed, dropping live_patch");
                return;
            }
        };
        let reply = WireMessage::reply_ok(&msg, json!({ "diff": diff }));
        if self.send(&reply) {
            self.flush_pushes();
            self.socket.reset_temporaries();
        }
    }

    fn on_info(&mut self, message: Value) {
        if self.status != SessionStatus::Joined {
            debug!("dropping internal message before join");
            return;
        }
        if let Err(e) = self.view.clone().handle_info(&message, &mut self.socket) {
            warn!(error = %e, "info handler failed, dropping");
            return;
        }
        self.drain_commands();

        let diff = match self.rerender_diff() {
            Ok(diff) => diff,
            Err(e) => {
                warn!(error = %e, "render failed, dropping internal message");
                return;
            }
        };
        let has_changes = diff.as_object().map(|m| !m.is_empty()).unwrap_or(true);
        if has_changes {
            let push = WireMessage::push(self.topic.clone(), EVENT_DIFF, diff);
            if !self.send(&push) {
                return;
            }
        }
        self.flush_pushes();
        self.socket.reset_temporaries();
    }

    /// Tears the session down exactly once: every subscription is released,
    /// every timer aborted, and all further messages are ignored.
    pub fn teardown(&mut self) {
        if self.status == SessionStatus::Terminated {
            return;
        }
        self.status = SessionStatus::Terminated;
        for (topic, token) in self.subscriptions.drain() {
            self.pubsub.unsubscribe(&topic, token);
        }
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    fn render_view(&mut self) -> Result<Value, String> {
        let view = self.view.clone();
        let mut ctx = RenderContext::new(&mut self.registry, &self.components);
        let template = view.render(self.socket.assigns(), &mut ctx);
        if let Some(e) = ctx.take_error() {
            return Err(e);
        }
        Ok(template.render_parts(true))
    }

    /// Re-renders the root tree and diffs it against the cached one, then
    /// folds in component diffs, title and queued push events.
    fn rerender_diff(&mut self) -> Result<Value, String> {
        let new_parts = self.render_view()?;
        let root_diff = match &self.cached_parts {
            Some(old) => diff(old, &new_parts),
            None => new_parts.clone(),
        };
        self.cached_parts = Some(new_parts);
        Ok(self.decorate(root_diff))
    }

    /// Adds the `"c"` (dirty components), `"t"` (changed title) and `"e"`
    /// (queued push events) keys to a reply tree when they carry anything.
    fn decorate(&mut self, mut tree: Value) -> Value {
        let Some(map) = tree.as_object_mut() else {
            return tree;
        };
        let component_diffs = self.registry.take_dirty();
        if !component_diffs.is_empty() {
            map.insert("c".to_string(), Value::Object(component_diffs));
        }
        if let Some(title) = self.socket.take_title() {
            map.insert("t".to_string(), Value::String(title));
        }
        let events = std::mem::take(&mut self.pending_events);
        if !events.is_empty() {
            map.insert("e".to_string(), Value::Array(events));
        }
        tree
    }

    fn drain_commands(&mut self) {
        for command in self.socket.take_commands() {
            match command {
                SocketCommand::SetTitle(title) => self.socket.apply_title(title),
                SocketCommand::PushEvent { event, payload } => {
                    self.pending_events.push(json!([event, payload]));
                }
                SocketCommand::LivePatch { url } => {
                    self.pending_pushes.push(WireMessage::push(
                        self.topic.clone(),
                        EVENT_LIVE_PATCH,
                        json!({ "url": url }),
                    ));
                }
                SocketCommand::Redirect { url } => {
                    self.pending_pushes.push(WireMessage::push(
                        self.topic.clone(),
                        EVENT_LIVE_REDIRECT,
                        json!({ "url": url }),
                    ));
                }
                SocketCommand::PutFlash { kind, message } => {
                    self.socket.insert_flash(kind, message);
                }
                SocketCommand::Subscribe { topic } => self.subscribe(topic),
                SocketCommand::Repeat {
                    message,
                    interval_ms,
                } => self.start_repeat(message, interval_ms),
            }
        }
    }

    fn subscribe(&mut self, topic: String) {
        if self.subscriptions.contains_key(&topic) {
            return;
        }
        let tx = self.inbox_tx.clone();
        let token = self.pubsub.subscribe(
            &topic,
            Arc::new(move |message: &Value| {
                let _ = tx.send(Envelope::Info(message.clone()));
            }),
        );
        self.subscriptions.insert(topic, token);
    }

    fn start_repeat(&mut self, message: Value, interval_ms: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, repeat timer not scheduled");
            return;
        };
        let tx = self.inbox_tx.clone();
        let timer = handle.spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms.max(1)));
            // the first tick completes immediately; skip it
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(Envelope::Info(message.clone())).is_err() {
                    return;
                }
            }
        });
        self.timers.push(timer);
    }

    /// Encodes and sends one frame. A transport error is a disconnect: the
    /// session tears down and the caller must stop producing output.
    fn send(&mut self, msg: &WireMessage) -> bool {
        let frame = match msg.encode() {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "failed to encode outbound frame");
                return false;
            }
        };
        if let Err(e) = self.transport.send(&frame) {
            warn!(error = %e, "transport send failed, tearing session down");
            self.teardown();
            return false;
        }
        true
    }

    fn flush_pushes(&mut self) {
        for push in std::mem::take(&mut self.pending_pushes) {
            if !self.send(&push) {
                return;
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Renders a view for the initial HTTP response, before any socket joins.
/// Commands enqueued during mount are discarded; subscriptions and timers
/// only exist on live sessions.
pub fn render_static(
    view: &dyn LiveView,
    components: &HashMap<String, Arc<dyn LiveComponent>>,
    params: &Map<String, Value>,
    session: &Map<String, Value>,
    url: Option<&str>,
) -> Result<String, String> {
    let mut socket = Socket::new(TransportMode::Http);
    view.mount(params, session, &mut socket)?;
    if let Some(url) = url {
        view.handle_params(url, &mut socket)?;
    }
    let mut registry = ComponentRegistry::new();
    let mut ctx = RenderContext::new(&mut registry, components);
    let template = view.render(socket.assigns(), &mut ctx);
    if let Some(e) = ctx.take_error() {
        return Err(e);
    }
    Ok(template.to_html())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSessionSerializer;
    use crate::transport::ChannelTransport;
    use ripple_core::{Dynamic, LiveTemplate};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Counter;

    impl LiveView for Counter {
        fn mount(
            &self,
            _params: &Map<String, Value>,
            _session: &Map<String, Value>,
            socket: &mut Socket,
        ) -> Result<(), String> {
            socket.assign("count", json!(0));
            socket.assign("notice", json!(""));
            socket.subscribe("room:1");
            Ok(())
        }

        fn handle_params(&self, url: &str, socket: &mut Socket) -> Result<(), String> {
            socket.assign("url", json!(url));
            Ok(())
        }

        fn render(
            &self,
            assigns: &Map<String, Value>,
            _ctx: &mut RenderContext<'_>,
        ) -> LiveTemplate {
            let get = |key: &str| assigns.get(key).cloned().unwrap_or(Value::Null);
            LiveTemplate::new(
                vec![
                    "count: ".to_string(),
                    " at ".to_string(),
                    " note: ".to_string(),
                    String::new(),
                ],
                vec![
                    Dynamic::Literal(get("count")),
                    Dynamic::Literal(get("url")),
                    Dynamic::Literal(get("notice")),
                ],
            )
        }

        fn handle_event(
            &self,
            event: &str,
            _value: &Value,
            socket: &mut Socket,
        ) -> Result<(), String> {
            match event {
                "inc" => {
                    let count = socket.get("count").and_then(Value::as_i64).unwrap_or(0);
                    socket.assign("count", json!(count + 1));
                }
                "title" => socket.set_title("Counter"),
                "notify" => socket.push_event("flashed", json!({"ok": true})),
                "flash_once" => {
                    socket.assign_temporary("notice", json!("saved"), json!(""));
                }
                "goto" => socket.live_patch("/counter?page=2"),
                "leave_site" => socket.redirect("/bye"),
                "boom" => return Err("boom".to_string()),
                _ => {}
            }
            Ok(())
        }

        fn handle_info(&self, message: &Value, socket: &mut Socket) -> Result<(), String> {
            socket.assign("count", message.clone());
            Ok(())
        }
    }

    struct Panel;

    impl LiveView for Panel {
        fn mount(
            &self,
            _params: &Map<String, Value>,
            _session: &Map<String, Value>,
            socket: &mut Socket,
        ) -> Result<(), String> {
            socket.assign("label", json!("new"));
            Ok(())
        }

        fn render(&self, assigns: &Map<String, Value>, ctx: &mut RenderContext<'_>) -> LiveTemplate {
            let label = assigns.get("label").cloned().unwrap_or(Value::Null);
            LiveTemplate::new(
                vec!["<div>".to_string(), "</div>".to_string()],
                vec![ctx.component("badge", Some("b"), json!({ "label": label }))],
            )
        }

        fn handle_event(
            &self,
            event: &str,
            value: &Value,
            socket: &mut Socket,
        ) -> Result<(), String> {
            if event == "relabel" {
                socket.assign("label", value.get("label").cloned().unwrap_or(Value::Null));
            }
            Ok(())
        }
    }

    struct Badge;

    impl LiveComponent for Badge {
        fn update(&self, params: &Value, assigns: &mut Map<String, Value>) -> Result<(), String> {
            if let Some(label) = params.get("label") {
                assigns.insert("label".to_string(), label.clone());
            }
            Ok(())
        }

        fn render(&self, assigns: &Map<String, Value>) -> LiveTemplate {
            LiveTemplate::new(
                vec!["<span>".to_string(), "</span>".to_string()],
                vec![Dynamic::Literal(
                    assigns.get("label").cloned().unwrap_or(Value::Null),
                )],
            )
        }

        fn handle_event(
            &self,
            event: &str,
            _value: &Value,
            assigns: &mut Map<String, Value>,
        ) -> Result<(), String> {
            if event == "clear" {
                assigns.insert("label".to_string(), json!(""));
            }
            Ok(())
        }
    }

    fn new_session(
        view: Arc<dyn LiveView>,
        pubsub: Arc<PubSub>,
    ) -> (LiveSession, UnboundedReceiver<String>) {
        let (transport, rx) = ChannelTransport::new();
        let session = LiveSession::new(
            view,
            Arc::new(JsonSessionSerializer),
            Box::new(transport),
            pubsub,
        );
        (session, rx)
    }

    fn join_frame(param_token: &str, session_token: &str) -> String {
        let mut session = Map::new();
        session.insert(CSRF_TOKEN_KEY.to_string(), json!(session_token));
        let blob = JsonSessionSerializer
            .serialize(&session)
            .expect("session blob");
        json!([
            "1",
            "1",
            "lv:test",
            EVENT_JOIN,
            {
                "params": { "_csrf_token": param_token, "_mounts": 0 },
                "session": blob,
                "static": null,
                "url": "/counter"
            }
        ])
        .to_string()
    }

    fn event_frame(msg_ref: &str, event: &str, value: Value) -> String {
        json!([
            "1",
            msg_ref,
            "lv:test",
            EVENT_EVENT,
            { "type": "click", "event": event, "value": value }
        ])
        .to_string()
    }

    fn recv_frame(rx: &mut UnboundedReceiver<String>) -> Value {
        let raw = rx.try_recv().expect("an outbound frame");
        serde_json::from_str(&raw).expect("outbound frame is json")
    }

    fn joined(view: Arc<dyn LiveView>) -> (LiveSession, UnboundedReceiver<String>) {
        let (mut session, mut rx) = new_session(view, Arc::new(PubSub::new()));
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);
        (session, rx)
    }

    #[test]
    fn join_replies_with_full_rendered_tree() {
        let (mut session, mut rx) = new_session(Arc::new(Counter), Arc::new(PubSub::new()));
        session.handle_frame(&join_frame("tok", "tok"));

        let frame = recv_frame(&mut rx);
        assert_eq!(frame[0], json!("1"));
        assert_eq!(frame[3], json!("phx_reply"));
        assert_eq!(frame[4]["status"], json!("ok"));
        assert_eq!(
            frame[4]["response"]["rendered"],
            json!({
                "0": "0",
                "1": "/counter",
                "2": "",
                "s": ["count: ", " at ", " note: ", ""]
            })
        );
        assert_eq!(session.status(), SessionStatus::Joined);
    }

    #[test]
    fn csrf_mismatch_produces_zero_outbound_messages() {
        let (mut session, mut rx) = new_session(Arc::new(Counter), Arc::new(PubSub::new()));
        session.handle_frame(&join_frame("attacker", "tok"));

        assert!(rx.try_recv().is_err());
        assert_eq!(session.status(), SessionStatus::Unjoined);
    }

    #[test]
    fn undeserializable_session_blob_is_silent() {
        let (mut session, mut rx) = new_session(Arc::new(Counter), Arc::new(PubSub::new()));
        let frame = json!([
            "1", "1", "lv:test", EVENT_JOIN,
            { "params": { "_csrf_token": "tok" }, "session": "not json", "static": null }
        ])
        .to_string();
        session.handle_frame(&frame);

        assert!(rx.try_recv().is_err());
        assert_eq!(session.status(), SessionStatus::Unjoined);
    }

    #[test]
    fn heartbeat_gets_empty_ok_reply() {
        let (mut session, mut rx) = joined(Arc::new(Counter));
        session.handle_frame(&json!(["1", "2", "lv:test", EVENT_HEARTBEAT, {}]).to_string());

        let frame = recv_frame(&mut rx);
        assert_eq!(frame[1], json!("2"));
        assert_eq!(frame[3], json!("phx_reply"));
        assert_eq!(frame[4], json!({ "response": {}, "status": "ok" }));
    }

    #[test]
    fn event_reply_carries_minimal_diff() {
        let (mut session, mut rx) = joined(Arc::new(Counter));

        session.handle_frame(&event_frame("2", "inc", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "0": "1" }));

        session.handle_frame(&event_frame("3", "inc", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "0": "2" }));
    }

    #[test]
    fn no_op_event_replies_with_empty_diff() {
        let (mut session, mut rx) = joined(Arc::new(Counter));
        session.handle_frame(&event_frame("2", "noop", json!({})));

        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({}));
    }

    #[test]
    fn event_before_join_is_dropped() {
        let (mut session, mut rx) = new_session(Arc::new(Counter), Arc::new(PubSub::new()));
        session.handle_frame(&event_frame("1", "inc", json!({})));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dangling_component_reference_is_dropped() {
        let (mut session, mut rx) = joined(Arc::new(Counter));
        let frame = json!([
            "1", "2", "lv:test", EVENT_EVENT,
            { "type": "click", "event": "clear", "value": {}, "cid": 99 }
        ])
        .to_string();
        session.handle_frame(&frame);

        assert!(rx.try_recv().is_err());
        assert_eq!(session.status(), SessionStatus::Joined);
    }

    #[test]
    fn failed_handler_drops_the_message_but_keeps_the_session() {
        let (mut session, mut rx) = joined(Arc::new(Counter));
        session.handle_frame(&event_frame("2", "boom", json!({})));
        assert!(rx.try_recv().is_err());

        session.handle_frame(&event_frame("3", "inc", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "0": "1" }));
    }

    #[test]
    fn title_and_push_events_ride_the_diff() {
        let (mut session, mut rx) = joined(Arc::new(Counter));

        session.handle_frame(&event_frame("2", "title", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "t": "Counter" }));

        session.handle_frame(&event_frame("3", "notify", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(
            frame[4]["response"]["diff"],
            json!({ "e": [["flashed", { "ok": true }]] })
        );
    }

    #[test]
    fn temporary_assign_resets_after_the_cycle() {
        let (mut session, mut rx) = joined(Arc::new(Counter));

        session.handle_frame(&event_frame("2", "flash_once", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "2": "saved" }));

        session.handle_frame(&event_frame("3", "noop", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "2": "" }));
    }

    #[test]
    fn navigation_commands_push_after_the_reply() {
        let (mut session, mut rx) = joined(Arc::new(Counter));

        session.handle_frame(&event_frame("2", "goto", json!({})));
        let reply = recv_frame(&mut rx);
        assert_eq!(reply[3], json!("phx_reply"));
        let push = recv_frame(&mut rx);
        assert_eq!(push[0], Value::Null);
        assert_eq!(push[1], Value::Null);
        assert_eq!(push[3], json!("live_patch"));
        assert_eq!(push[4], json!({ "url": "/counter?page=2" }));

        session.handle_frame(&event_frame("3", "leave_site", json!({})));
        let reply = recv_frame(&mut rx);
        assert_eq!(reply[3], json!("phx_reply"));
        let push = recv_frame(&mut rx);
        assert_eq!(push[3], json!("live_redirect"));
        assert_eq!(push[4], json!({ "url": "/bye" }));
    }

    #[test]
    fn unknown_wire_event_is_dropped_with_state_untouched() {
        let (mut session, mut rx) = joined(Arc::new(Counter));

        session.handle_frame(&json!(["1", "2", "lv:test", "bogus", {}]).to_string());
        assert!(rx.try_recv().is_err());
        assert_eq!(session.status(), SessionStatus::Joined);

        session.handle_frame(&event_frame("3", "inc", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "0": "1" }));
    }

    #[test]
    fn second_join_is_dropped_without_resetting_state() {
        let (mut session, mut rx) = joined(Arc::new(Counter));
        session.handle_frame(&event_frame("2", "inc", json!({})));
        recv_frame(&mut rx);

        session.handle_frame(&join_frame("tok", "tok"));
        assert!(rx.try_recv().is_err());
        assert_eq!(session.status(), SessionStatus::Joined);

        // count survives the dropped join attempt
        session.handle_frame(&event_frame("3", "inc", json!({})));
        let frame = recv_frame(&mut rx);
        assert_eq!(frame[4]["response"]["diff"], json!({ "0": "2" }));
    }

    #[test]
    fn join_records_session_identity() {
        let (mut session, mut rx) = new_session(Arc::new(Counter), Arc::new(PubSub::new()));
        assert_eq!(session.join_id(), None);
        assert_eq!(session.connection_id(), None);

        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);
        assert_eq!(session.join_id(), Some("1"));
        assert_eq!(session.connection_id(), Some("test"));
    }

    #[test]
    fn live_patch_reruns_the_params_handler() {
        let (mut session, mut rx) = joined(Arc::new(Counter));
        let frame = json!([
            "1", "2", "lv:test", EVENT_LIVE_PATCH, { "url": "/counter?page=2" }
        ])
        .to_string();
        session.handle_frame(&frame);

        let frame = recv_frame(&mut rx);
        assert_eq!(frame[3], json!("phx_reply"));
        assert_eq!(frame[4]["response"]["diff"], json!({ "1": "/counter?page=2" }));
    }

    #[test]
    fn form_event_values_are_decoded_before_the_handler() {
        let (mut session, mut rx) = new_session(Arc::new(Panel), Arc::new(PubSub::new()));
        session.register_component("badge", Arc::new(Badge));
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);

        let frame = json!([
            "1", "2", "lv:test", EVENT_EVENT,
            { "type": "form", "event": "relabel", "value": "label=hot" }
        ])
        .to_string();
        session.handle_frame(&frame);

        let frame = recv_frame(&mut rx);
        assert_eq!(
            frame[4]["response"]["diff"],
            json!({ "c": { "1": { "0": "hot" } } })
        );
    }

    #[test]
    fn join_ships_stateful_components_under_c() {
        let pubsub = Arc::new(PubSub::new());
        let (mut session, mut rx) = new_session(Arc::new(Panel), pubsub);
        session.register_component("badge", Arc::new(Badge));
        session.handle_frame(&join_frame("tok", "tok"));

        let frame = recv_frame(&mut rx);
        assert_eq!(
            frame[4]["response"]["rendered"],
            json!({
                "0": 1,
                "s": ["<div>", "</div>"],
                "c": { "1": { "0": "new", "s": ["<span>", "</span>"] } }
            })
        );
    }

    #[test]
    fn component_event_rerenders_only_that_component() {
        let (mut session, mut rx) = new_session(Arc::new(Panel), Arc::new(PubSub::new()));
        session.register_component("badge", Arc::new(Badge));
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);

        let frame = json!([
            "1", "2", "lv:test", EVENT_EVENT,
            { "type": "click", "event": "clear", "value": {}, "cid": 1 }
        ])
        .to_string();
        session.handle_frame(&frame);

        let frame = recv_frame(&mut rx);
        assert_eq!(
            frame[4]["response"]["diff"],
            json!({ "c": { "1": { "0": "" } } })
        );
    }

    #[test]
    fn component_reference_stays_stable_across_renders() {
        let (mut session, mut rx) = new_session(Arc::new(Panel), Arc::new(PubSub::new()));
        session.register_component("badge", Arc::new(Badge));
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);

        session.handle_frame(&event_frame("2", "relabel", json!({ "label": "hot" })));
        let frame = recv_frame(&mut rx);
        // root tree still points at component 1; only the component diff ships
        assert_eq!(
            frame[4]["response"]["diff"],
            json!({ "c": { "1": { "0": "hot" } } })
        );
    }

    #[test]
    fn leave_releases_subscriptions_exactly_once() {
        let pubsub = Arc::new(PubSub::new());
        let (mut session, mut rx) = new_session(Arc::new(Counter), pubsub.clone());
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);
        assert_eq!(pubsub.subscriber_count("room:1"), 1);

        session.handle_frame(&json!(["1", "2", "lv:test", EVENT_LEAVE, {}]).to_string());
        assert!(session.is_terminated());
        assert_eq!(pubsub.subscriber_count("room:1"), 0);

        session.handle_frame(&event_frame("3", "inc", json!({})));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_pushes_a_diff_with_null_refs() {
        let pubsub = Arc::new(PubSub::new());
        let (mut session, mut rx) = new_session(Arc::new(Counter), pubsub.clone());
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);

        pubsub.broadcast("room:1", &json!(7));
        // the delivery sits in the inbox until the session pumps again
        session.handle_frame(&json!(["1", "2", "lv:test", EVENT_HEARTBEAT, {}]).to_string());

        let push = recv_frame(&mut rx);
        assert_eq!(push[0], Value::Null);
        assert_eq!(push[1], Value::Null);
        assert_eq!(push[3], json!("diff"));
        assert_eq!(push[4], json!({ "0": "7" }));

        let heartbeat_reply = recv_frame(&mut rx);
        assert_eq!(heartbeat_reply[3], json!("phx_reply"));
    }

    #[test]
    fn transport_failure_tears_the_session_down() {
        let pubsub = Arc::new(PubSub::new());
        let (mut session, mut rx) = new_session(Arc::new(Counter), pubsub.clone());
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);

        drop(rx);
        session.handle_frame(&event_frame("2", "inc", json!({})));

        assert!(session.is_terminated());
        assert_eq!(pubsub.subscriber_count("room:1"), 0);
    }

    #[tokio::test]
    async fn repeat_timer_delivers_internal_messages() {
        struct Ticker;
        impl LiveView for Ticker {
            fn mount(
                &self,
                _params: &Map<String, Value>,
                _session: &Map<String, Value>,
                socket: &mut Socket,
            ) -> Result<(), String> {
                socket.assign("last", json!(0));
                socket.send_repeat(json!(9), 5);
                Ok(())
            }

            fn render(
                &self,
                assigns: &Map<String, Value>,
                _ctx: &mut RenderContext<'_>,
            ) -> LiveTemplate {
                LiveTemplate::new(
                    vec!["tick ".to_string(), String::new()],
                    vec![Dynamic::Literal(
                        assigns.get("last").cloned().unwrap_or(Value::Null),
                    )],
                )
            }

            fn handle_info(&self, message: &Value, socket: &mut Socket) -> Result<(), String> {
                socket.assign("last", message.clone());
                Ok(())
            }
        }

        let (mut session, mut rx) = new_session(Arc::new(Ticker), Arc::new(PubSub::new()));
        session.handle_frame(&join_frame("tok", "tok"));
        recv_frame(&mut rx);

        let envelope = tokio::time::timeout(std::time::Duration::from_secs(5), session.recv())
            .await
            .expect("a timer tick within five seconds")
            .expect("inbox open");
        session.process(envelope);

        let push = recv_frame(&mut rx);
        assert_eq!(push[3], json!("diff"));
        assert_eq!(push[4], json!({ "0": "9" }));
    }

    #[test]
    fn static_render_produces_flat_html() {
        let html = render_static(
            &Counter,
            &HashMap::new(),
            &Map::new(),
            &Map::new(),
            Some("/home"),
        )
        .expect("static render");
        assert_eq!(html, "count: 0 at /home note: ");
    }
}
