mod server;
mod session;

pub use server::{Application, OutboundESLServer};
pub use session::OutboundSession;
