use tokio::sync::mpsc;

/// Outbound half of a client connection.
///
/// The session never touches the wire itself; it hands encoded frames to the
/// transport and tears itself down when a send fails, treating the failure as
/// a disconnect.
pub trait Transport: Send {
    fn send(&self, frame: &str) -> Result<(), String>;
}

/// A transport backed by an in-process channel. The websocket adapter drains
/// the receiving end into the socket; tests drain it directly.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: &str) -> Result<(), String> {
        self.tx
            .send(frame.to_string())
            .map_err(|_| "transport closed".to_string())
    }
}
