use serde_json::{Map, Value};

/// How the socket is connected. A single struct covers both modes; there is
/// no transport subclassing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// A live connection over the wire protocol.
    WebSocket,
    /// The initial non-connected render.
    Http,
}

/// A typed command enqueued by a handler and drained by the session state
/// machine once per handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCommand {
    SetTitle(String),
    PushEvent { event: String, payload: Value },
    LivePatch { url: String },
    Redirect { url: String },
    PutFlash { kind: String, message: String },
    Subscribe { topic: String },
    Repeat { message: Value, interval_ms: u64 },
}

/// Per-connection socket state handed to view callbacks.
///
/// Holds the assigns (the opaque application context), temporary-assign
/// reset defaults, the page title, the one-shot flash map, and the command
/// queue. Handlers mutate assigns and enqueue commands; they never talk to
/// the transport directly.
#[derive(Debug)]
pub struct Socket {
    mode: TransportMode,
    assigns: Map<String, Value>,
    temporaries: Map<String, Value>,
    page_title: Option<String>,
    title_dirty: bool,
    flash: Map<String, Value>,
    commands: Vec<SocketCommand>,
}

impl Socket {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            assigns: Map::new(),
            temporaries: Map::new(),
            page_title: None,
            title_dirty: false,
            flash: Map::new(),
            commands: Vec::new(),
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn assign(&mut self, key: impl Into<String>, value: Value) {
        self.assigns.insert(key.into(), value);
    }

    /// Assigns a value and registers the key as temporary: after every render
    /// cycle it reverts to `reset_default`.
    pub fn assign_temporary(
        &mut self,
        key: impl Into<String>,
        value: Value,
        reset_default: Value,
    ) {
        let key = key.into();
        self.temporaries.insert(key.clone(), reset_default);
        self.assigns.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.assigns.get(key)
    }

    pub fn assigns(&self) -> &Map<String, Value> {
        &self.assigns
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.commands.push(SocketCommand::SetTitle(title.into()));
    }

    pub fn push_event(&mut self, event: impl Into<String>, payload: Value) {
        self.commands.push(SocketCommand::PushEvent {
            event: event.into(),
            payload,
        });
    }

    pub fn live_patch(&mut self, url: impl Into<String>) {
        self.commands.push(SocketCommand::LivePatch { url: url.into() });
    }

    pub fn redirect(&mut self, url: impl Into<String>) {
        self.commands.push(SocketCommand::Redirect { url: url.into() });
    }

    pub fn put_flash(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.commands.push(SocketCommand::PutFlash {
            kind: kind.into(),
            message: message.into(),
        });
    }

    pub fn subscribe(&mut self, topic: impl Into<String>) {
        self.commands.push(SocketCommand::Subscribe {
            topic: topic.into(),
        });
    }

    /// Schedules a repeating internal message delivered to `handle_info`
    /// every `interval_ms` milliseconds until the session ends.
    pub fn send_repeat(&mut self, message: Value, interval_ms: u64) {
        self.commands.push(SocketCommand::Repeat {
            message,
            interval_ms,
        });
    }

    /// Reads and clears a flash entry.
    pub fn take_flash(&mut self, kind: &str) -> Option<Value> {
        self.flash.remove(kind)
    }

    pub(crate) fn take_commands(&mut self) -> Vec<SocketCommand> {
        std::mem::take(&mut self.commands)
    }

    pub(crate) fn apply_title(&mut self, title: String) {
        if self.page_title.as_deref() != Some(title.as_str()) {
            self.page_title = Some(title);
            self.title_dirty = true;
        }
    }

    /// The page title, if it changed since the last reply.
    pub(crate) fn take_title(&mut self) -> Option<String> {
        if self.title_dirty {
            self.title_dirty = false;
            self.page_title.clone()
        } else {
            None
        }
    }

    pub(crate) fn merge_flash(&mut self, flash: Map<String, Value>) {
        for (k, v) in flash {
            self.flash.insert(k, v);
        }
    }

    pub(crate) fn insert_flash(&mut self, kind: String, message: String) {
        self.flash.insert(kind, Value::String(message));
    }

    /// Reverts every temporary assign to its registered default.
    pub(crate) fn reset_temporaries(&mut self) {
        for (key, default) in self.temporaries.clone() {
            self.assigns.insert(key, default);
        }
    }
}
