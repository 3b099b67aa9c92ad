//! herald-sdk: IRC client library for announce-channel monitoring.
//!
//! - `irc`: line codec
//! - `format`: mIRC formatting removal
//! - `client`: connection, registration, SASL PLAIN, keepalive
//! - `event`: typed inbound events

pub mod client;
pub mod event;
pub mod format;
pub mod irc;
