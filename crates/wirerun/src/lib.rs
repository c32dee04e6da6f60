//! # Wirerun
//!
//! An object protocol engine in the style of Wayland: two peers share a
//! namespace of numbered objects, each implementing a versioned interface,
//! and exchange requests and events addressed to them over a transport.
//!
//! - `Connection` owns the object table and speaks the wire format from
//!   `wirepack`.
//! - `server::Display` and `client::ClientSession` drive connections over a
//!   `Transport`.
//! - `bridge::Bridge` splits one client between a local connection and a
//!   native compositor.

pub mod bridge;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod global;
pub mod handles;
pub mod interceptor;
pub mod interface;
pub mod objects;
pub mod protocol;
pub mod proxy;
pub mod resource;
pub mod server;
pub mod transport;

#[doc(hidden)]
pub mod mock_transport;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use config::Side;
pub use connection::Connection;
pub use error::CloseReason;
pub use error::Error;
pub use error::Result;
pub use interface::Dispatch;
pub use interface::Interface;
pub use interface::Message;
pub use proxy::Object;
pub use proxy::Proxy;
pub use resource::Resource;
