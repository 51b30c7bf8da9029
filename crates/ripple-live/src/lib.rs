//! Ripple live-session crate.
//!
//! This crate layers the live protocol on top of `ripple-core`'s template
//! and diff engine:
//!
//! - `protocol`: the 5-element wire tuple, payload types, and form decoding.
//! - `session`: the per-connection state machine (`Unjoined → Joined →
//!   Terminated`) with its single-flight inbox.
//! - `components`: the stateful component registry and render context.
//! - `socket` / `view`: the handler-facing surface — assigns, the typed
//!   command buffer, and the `LiveView` / `LiveComponent` traits.
//! - `pubsub` / `serializer` / `transport`: the injected collaborators.
//!
//! Control flow (high level):
//!
//! 1. A join deserializes and CSRF-checks the session blob, mounts the view,
//!    and replies with the full rendered parts tree.
//! 2. Every later message re-renders and ships only the structural diff,
//!    with dirty component subtrees under `"c"`.
//! 3. Teardown releases every subscription and timer exactly once; any
//!    transport send failure is a teardown.
//!
//! The critical design rule is that all of a session's messages — client
//! frames, pub/sub deliveries, timer ticks — pass through one inbox and run
//! to completion one at a time.

#[cfg(feature = "axum")]
pub mod adapters;
pub mod components;
pub mod protocol;
pub mod pubsub;
pub mod serializer;
pub mod session;
pub mod socket;
pub mod transport;
pub mod view;

#[cfg(feature = "axum")]
pub use adapters::axum::AxumLiveAdapter;
pub use components::{ComponentRegistry, RenderContext};
pub use protocol::{
    decode_event_value, decode_form, EventPayload, JoinPayload, LivePatchPayload, WireMessage,
};
pub use pubsub::{PubSub, Subscriber};
pub use serializer::{JsonSessionSerializer, SessionSerializer};
pub use session::{render_static, Envelope, LiveSession, SessionStatus};
pub use socket::{Socket, SocketCommand, TransportMode};
pub use transport::{ChannelTransport, Transport};
pub use view::{LiveComponent, LiveView};
