//! FreeSWITCH Event Socket Layer client and embedded outbound server.
//!
//! Two usage modes:
//!
//! - **Inbound** ([`InboundESL`]): dial a running switch, authenticate, and
//!   issue commands whose replies are matched back to the caller in order.
//! - **Outbound** ([`OutboundESLServer`]/[`OutboundSession`]): the switch
//!   dials *in* per call; an [`outbound::Application`] drives the call via
//!   execute-application commands.
//!
//! Parsing the wire protocol, subscribing to events, and correlating
//! commands to replies are this crate's job. Dialplan/routing policy,
//! retries/reconnection, and anything involving the media path are the
//! caller's.

mod connection;
mod correlator;
mod dispatcher;
mod error;
mod event;
mod frame;
mod header;
mod inbound;
pub mod outbound;
mod registry;

pub use connection::ConnectionConfig;
pub use error::Error;
pub use event::{Body, Event};
pub use header::HeaderMap;
pub use inbound::InboundESL;
pub use outbound::{Application, OutboundESLServer, OutboundSession};
pub use registry::{FnHandler, Handler, HandlerRegistry, DISCONNECT, LOG, WILDCARD};
