//! Browser-side bridge between an orchestration gateway, a local CDP relay
//! and the browser's tabs.
//!
//! The [`Bridge`] keeps two links alive: a control-plane [`GatewayLink`]
//! (handshake, session key, chat) and a data-plane [`RelayLink`] (CDP
//! commands in, CDP events out). Relay commands are gated by the
//! [`WriteAccessGate`], routed to a tab through the [`SessionRegistry`] and
//! executed on an [`AutomationSurface`]; surface events flow back through the
//! [`EventForwarder`].
//!
//! The browser itself is supplied by the host through the [`AutomationSurface`]
//! and [`TabHost`] traits, sockets through a [`Dialer`].

pub mod backoff;
pub mod bridge;
pub mod config;
mod context;
pub mod error;
pub mod forwarder;
pub mod gate;
pub mod gateway;
mod link;
pub mod notice;
pub mod registry;
pub mod relay;
pub mod router;
pub mod surface;
pub mod transport;

#[cfg(test)]
mod testing;

pub use backoff::{Backoff, Backoffs, LinkKind};
pub use bridge::{Bridge, BridgeHandle, RESTRICTED_NAVIGATION};
pub use config::{DEFAULT_GATEWAY_URL, DEFAULT_RELAY_PORT, LinkConfig};
pub use error::{Error, Result};
pub use forwarder::EventForwarder;
pub use gate::{WRITE_METHOD_PREFIXES, WriteAccessGate, is_write_method};
pub use gateway::{GATEWAY_DIAL_TIMEOUT, GatewayLink};
pub use notice::{LinkState, Notice, TabState, TabStatus};
pub use registry::{AttachOutcome, SessionRegistry, TabAttachment, is_restricted_url};
pub use relay::{RELAY_CONNECT_TIMEOUT, RelayLink};
pub use router::{CommandRouter, CompensatingStep};
pub use surface::{AutomationSurface, BrowserEvent, SurfaceError, TabHost, TabId, TabInfo};
pub use transport::{Dialer, TransportParts, WebSocketDialer};
