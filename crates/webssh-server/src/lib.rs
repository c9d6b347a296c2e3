//! webssh-server: browser terminals bridged to SSH sessions.
//!
//! A [`session::ConnectionRegistry`] owns every live SSH session. Browser
//! clients attach over WebSocket and are served by [`bridge::serve`].

pub mod bridge;
pub mod config;
pub mod server;
pub mod session;
pub mod transport;
