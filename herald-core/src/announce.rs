//! Completed announcements and where they go.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::extract::Vars;

/// One fully parsed announcement, ready for release construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Announce {
    /// Identifier of the indexer definition that parsed it.
    pub indexer: String,
    pub network: String,
    pub channel: String,
    pub vars: Vars,
    pub torrent_url: String,
    pub torrent_name: String,
    pub info_url: String,
    pub received_at: DateTime<Utc>,
}

/// Receiver of completed announcements (filters, download pipeline).
///
/// Each delivery runs in its own task; a slow sink never stalls a channel's
/// queue.
#[async_trait]
pub trait AnnounceSink: Send + Sync {
    async fn deliver(&self, announce: Announce);
}

#[async_trait]
impl AnnounceSink for mpsc::UnboundedSender<Announce> {
    async fn deliver(&self, announce: Announce) {
        if self.send(announce).is_err() {
            tracing::debug!("announce receiver dropped");
        }
    }
}
