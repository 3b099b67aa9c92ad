//! # herald-core
//!
//! Watches tracker announce channels on IRC and turns announce lines into
//! structured releases.
//!
//! One [`handler::Handler`] runs per network. It keeps a connection state
//! machine and one channel state machine per channel, and feeds lines from
//! recognised announcers into a per-channel [`queue::AnnounceQueue`]. The
//! queue applies the indexer's line rules ([`extract`]) and templates
//! ([`template`]) and hands each completed [`announce::Announce`] to an
//! [`announce::AnnounceSink`].

pub mod announce;
pub mod channel;
pub mod channel_state;
pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod extract;
pub mod handler;
pub mod health;
pub mod queue;
pub mod service;
pub mod session;
pub mod state;
pub mod template;

pub use announce::{Announce, AnnounceSink};
pub use config::{DaemonConfig, NetworkConfig};
pub use definition::IndexerDefinition;
pub use handler::Handler;
pub use service::Service;
