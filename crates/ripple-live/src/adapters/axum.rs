use crate::pubsub::PubSub;
use crate::serializer::SessionSerializer;
use crate::session::LiveSession;
use crate::transport::ChannelTransport;
use crate::view::{LiveComponent, LiveView};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Binds a view (and its component types) to axum WebSocket upgrades. One
/// adapter serves many connections; each upgrade gets its own session.
#[derive(Clone)]
pub struct AxumLiveAdapter {
    view: Arc<dyn LiveView>,
    components: HashMap<String, Arc<dyn LiveComponent>>,
    serializer: Arc<dyn SessionSerializer>,
    pubsub: Arc<PubSub>,
}

impl AxumLiveAdapter {
    pub fn new(
        view: Arc<dyn LiveView>,
        serializer: Arc<dyn SessionSerializer>,
        pubsub: Arc<PubSub>,
    ) -> Self {
        Self {
            view,
            components: HashMap::new(),
            serializer,
            pubsub,
        }
    }

    pub fn with_component(
        mut self,
        type_name: impl Into<String>,
        component: Arc<dyn LiveComponent>,
    ) -> Self {
        self.components.insert(type_name.into(), component);
        self
    }

    /// A fresh session wired to a channel transport; the receiver carries the
    /// session's outbound frames.
    pub fn session(&self) -> (LiveSession, mpsc::UnboundedReceiver<String>) {
        let (transport, rx) = ChannelTransport::new();
        let mut session = LiveSession::new(
            self.view.clone(),
            self.serializer.clone(),
            Box::new(transport),
            self.pubsub.clone(),
        );
        for (type_name, component) in &self.components {
            session.register_component(type_name.clone(), component.clone());
        }
        (session, rx)
    }

    pub fn upgrade(&self, ws: WebSocketUpgrade) -> Response {
        let adapter = self.clone();
        ws.on_upgrade(move |socket| adapter.handle_socket(socket))
    }

    async fn handle_socket(self, mut socket: WebSocket) {
        let (mut session, mut out_rx) = self.session();

        loop {
            tokio::select! {
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => session.handle_frame(&text),
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        _ => {}
                    }
                }
                Some(envelope) = session.recv() => {
                    session.process(envelope);
                }
                outbound = out_rx.recv() => {
                    match outbound {
                        Some(frame) => {
                            if socket.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
            if session.is_terminated() {
                break;
            }
        }

        // flush anything produced before the session ended
        while let Ok(frame) = out_rx.try_recv() {
            if socket.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        session.teardown();
    }
}
