//! Wire types for the two links tabbridge keeps open.
//!
//! - [`gateway`]: request/response/event frames exchanged with the
//!   orchestration gateway (handshake, chat).
//! - [`relay`]: frames exchanged with the local automation relay
//!   (keepalive, forwarded CDP commands and events).
//!
//! Inbound frames are decoded once, here, into tagged enums. Nothing in this
//! crate performs I/O.

pub mod gateway;
pub mod relay;

pub use gateway::{
	ChatContent, ChatEventPayload, ChatSendParams, ClientInfo, ConnectAuth, ConnectParams,
	ErrorShape, GatewayFrame, HelloPayload, RequestFrame, ResponseFrame,
};
pub use relay::{CommandResponse, ForwardCommand, ForwardEvent, RelayInbound, RelayOutbound, RequestId};
