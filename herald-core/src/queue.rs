//! Per-channel announce queue.
//!
//! Lines pushed by the dispatcher are consumed by one task per channel. The
//! task pulls exactly one line per rule of the channel's indexer definition;
//! a whole sequence of matches becomes one [`Announce`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::announce::{Announce, AnnounceSink};
use crate::definition::IndexerDefinition;
use crate::error::QueueError;
use crate::extract::{Vars, extract_line};
use crate::template::assemble;

/// Lines buffered per channel before the dispatcher blocks.
pub const QUEUE_CAPACITY: usize = 128;

pub struct AnnounceQueue {
    channel: String,
    tx: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

struct Consumer {
    network: String,
    channel: String,
    definition: Arc<IndexerDefinition>,
    sink: Arc<dyn AnnounceSink>,
}

impl AnnounceQueue {
    /// Create the queue and start its consumer task.
    pub fn spawn(
        network: &str,
        channel: &str,
        definition: Arc<IndexerDefinition>,
        sink: Arc<dyn AnnounceSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let consumer = Consumer {
            network: network.to_string(),
            channel: channel.to_string(),
            definition,
            sink,
        };
        let task = tokio::spawn(consumer.run(rx));
        Self {
            channel: channel.to_string(),
            tx,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// A producer handle. Cloning it out lets the caller await without
    /// holding any map guard.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.tx.clone()
    }

    /// Enqueue a line, waiting while the queue is full.
    pub async fn push(&self, line: String) -> Result<(), QueueError> {
        self.tx.send(line).await.map_err(|_| QueueError::Closed)
    }

    /// Stop the consumer. Buffered lines and a partially matched sequence
    /// are dropped.
    pub async fn close(self) {
        drop(self.tx);
        self.task.abort();
        match self.task.await {
            Err(e) if !e.is_cancelled() => {
                tracing::warn!(channel = %self.channel, error = %e, "announce consumer ended abnormally");
            }
            _ => {}
        }
        tracing::debug!(channel = %self.channel, "announce queue closed");
    }
}

impl Consumer {
    async fn run(self, mut rx: mpsc::Receiver<String>) {
        let rules = &self.definition.irc.parse.lines;
        if rules.is_empty() {
            tracing::warn!(channel = %self.channel, indexer = %self.definition.identifier, "definition has no parse lines, discarding announces");
            while rx.recv().await.is_some() {}
            return;
        }

        loop {
            let mut vars = Vars::new();
            let mut failed = false;

            // Always take one line per rule so the next attempt starts on a
            // fresh announcement.
            for rule in rules {
                let Some(line) = rx.recv().await else {
                    tracing::debug!(channel = %self.channel, "announce queue closed");
                    return;
                };
                if failed {
                    tracing::trace!(channel = %self.channel, %line, "discarding line of failed announce");
                    continue;
                }
                tracing::trace!(channel = %self.channel, %line, "processing line");

                match extract_line(&rule.pattern, &rule.mode, &mut vars, &line, rule.ignore) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(channel = %self.channel, %line, "line not matching expected pattern");
                        failed = true;
                    }
                    Err(e) => {
                        tracing::error!(channel = %self.channel, error = %e, %line, "could not parse line");
                        failed = true;
                    }
                }
            }

            if failed {
                continue;
            }
            self.complete(vars);
        }
    }

    fn complete(&self, vars: Vars) {
        let assembled = match assemble(&self.definition.irc.parse.template, &vars, &self.definition.settings) {
            Ok(a) => a,
            Err(e) => {
                tracing::error!(channel = %self.channel, indexer = %self.definition.identifier, error = %e, "could not assemble announce");
                return;
            }
        };

        let announce = Announce {
            indexer: self.definition.identifier.clone(),
            network: self.network.clone(),
            channel: self.channel.clone(),
            vars: assembled.vars,
            torrent_url: assembled.torrent_url,
            torrent_name: assembled.torrent_name,
            info_url: assembled.info_url,
            received_at: Utc::now(),
        };
        tracing::debug!(channel = %self.channel, indexer = %announce.indexer, "announce parsed");

        let sink = self.sink.clone();
        tokio::spawn(async move {
            sink.deliver(announce).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::definition::{IrcSettings, LineRule, MatchTemplate, ParseRules};

    fn definition(lines: Vec<LineRule>) -> Arc<IndexerDefinition> {
        Arc::new(IndexerDefinition {
            identifier: "test".into(),
            name: "Test".into(),
            irc: IrcSettings {
                network: "TestNet".into(),
                channels: vec!["#announce".into()],
                announcers: vec!["Bot".into()],
                parse: ParseRules {
                    lines,
                    template: MatchTemplate {
                        torrent_url: "https://t.test/dl/{{ .id }}".into(),
                        ..Default::default()
                    },
                },
                ..Default::default()
            },
            settings: Default::default(),
        })
    }

    fn two_line_definition() -> Arc<IndexerDefinition> {
        definition(vec![
            LineRule::positional(r"^a(\d)$", &["first"]),
            LineRule::positional(r"^b(\d)$", &["second"]),
        ])
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Announce>) -> Announce {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for announce")
            .expect("sink closed")
    }

    #[tokio::test]
    async fn test_multi_line_announce() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = AnnounceQueue::spawn("TestNet", "#announce", two_line_definition(), Arc::new(tx));

        queue.push("a1".into()).await.unwrap();
        queue.push("b2".into()).await.unwrap();

        let announce = recv(&mut rx).await;
        assert_eq!(announce.indexer, "test");
        assert_eq!(announce.network, "TestNet");
        assert_eq!(announce.channel, "#announce");
        assert_eq!(announce.vars["first"], "1");
        assert_eq!(announce.vars["second"], "2");
    }

    #[tokio::test]
    async fn test_failed_attempt_consumes_full_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = AnnounceQueue::spawn("TestNet", "#announce", two_line_definition(), Arc::new(tx));

        // First attempt fails on "x"; "a1" belongs to it and is discarded.
        for line in ["x", "a1", "a2", "b2"] {
            queue.push(line.into()).await.unwrap();
        }

        let announce = recv(&mut rx).await;
        assert_eq!(announce.vars["first"], "2");
        assert_eq!(announce.vars["second"], "2");

        queue.close().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_consecutive_failures_never_reuse_lines() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = AnnounceQueue::spawn("TestNet", "#announce", two_line_definition(), Arc::new(tx));

        // Three failed attempts of two lines each, then a good one.
        for line in ["a1", "x", "y", "b1", "b1", "a1", "a3", "b4"] {
            queue.push(line.into()).await.unwrap();
        }

        let announce = recv(&mut rx).await;
        assert_eq!(announce.vars["first"], "3");
        assert_eq!(announce.vars["second"], "4");

        queue.close().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_ignored_line_continues_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let def = definition(vec![
            LineRule::positional(r"^-+$", &["ignored"]).ignored(),
            LineRule::named_scan(r"id=(?P<id>\d+)"),
        ]);
        let queue = AnnounceQueue::spawn("TestNet", "#announce", def, Arc::new(tx));

        queue.push("-----".into()).await.unwrap();
        queue.push("new release id=42".into()).await.unwrap();

        let announce = recv(&mut rx).await;
        assert!(!announce.vars.contains_key("ignored"));
        assert_eq!(announce.vars["id"], "42");
        assert_eq!(announce.torrent_url, "https://t.test/dl/42");
    }

    #[tokio::test]
    async fn test_invalid_pattern_abandons_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let def = definition(vec![LineRule::positional("(broken", &["id"])]);
        let queue = AnnounceQueue::spawn("TestNet", "#announce", def, Arc::new(tx));

        queue.push("anything".into()).await.unwrap();
        queue.close().await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_push_after_consumer_gone() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let queue = AnnounceQueue::spawn("TestNet", "#announce", two_line_definition(), Arc::new(tx));
        let sender = queue.sender();
        queue.close().await;
        assert!(sender.send("a1".into()).await.is_err());
    }
}
