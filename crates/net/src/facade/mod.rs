mod client;
mod events;
mod server;

pub use client::SocketClientFacade;
pub use events::{DisconnectReason, ServerEvent};
pub use server::SocketServerFacade;
