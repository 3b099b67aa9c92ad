//! All configured networks, one [`Handler`] each.

use std::sync::Arc;

use dashmap::DashMap;

use crate::announce::AnnounceSink;
use crate::config::{DaemonConfig, NetworkConfig};
use crate::definition::IndexerDefinition;
use crate::error::SessionError;
use crate::handler::Handler;
use crate::health::NetworkHealth;

pub struct Service {
    handlers: DashMap<String, Arc<Handler>>,
    sink: Arc<dyn AnnounceSink>,
}

impl Service {
    pub fn new(sink: Arc<dyn AnnounceSink>) -> Self {
        Self {
            handlers: DashMap::new(),
            sink,
        }
    }

    /// Start every enabled network with the indexers that belong to it.
    /// Returns how many were started.
    pub async fn start_networks(&self, config: &DaemonConfig) -> usize {
        let mut started = 0;
        for network in &config.network {
            if !network.enabled {
                tracing::info!(network = %network.name, "network disabled, skipping");
                continue;
            }
            let definitions = config.definitions_for(network);
            if definitions.is_empty() {
                tracing::warn!(network = %network.name, "no indexer uses this network");
            }
            self.start_network(network.clone(), definitions).await;
            started += 1;
        }
        started
    }

    /// Start a network. A handler left from an earlier start is brought up
    /// to date with `config` and `definitions` first.
    pub async fn start_network(
        &self,
        config: NetworkConfig,
        definitions: Vec<Arc<IndexerDefinition>>,
    ) -> Arc<Handler> {
        let handler = match self.handler(&config.name) {
            Some(existing) => self.apply(existing, config, definitions).await,
            None => self.insert(config, definitions),
        };
        handler.start();
        handler
    }

    /// Bring a network in line with new settings.
    ///
    /// A changed server, port, TLS setting, server password, invite command,
    /// SASL login or indexer set replaces the handler and reconnects, if it
    /// was running. Anything else goes to the live connection without
    /// dropping it. A disabled network is stopped and removed; an unknown
    /// one is started. Returns the handler now serving the network.
    pub async fn update_network(
        &self,
        config: NetworkConfig,
        definitions: Vec<Arc<IndexerDefinition>>,
    ) -> Option<Arc<Handler>> {
        if !config.enabled {
            if self.remove_network(&config.name).await.is_err() {
                tracing::debug!(network = %config.name, "disabled network was not running");
            }
            return None;
        }
        let handler = match self.handler(&config.name) {
            Some(existing) => self.apply(existing, config, definitions).await,
            None => self.start_network(config, definitions).await,
        };
        Some(handler)
    }

    async fn apply(
        &self,
        existing: Arc<Handler>,
        config: NetworkConfig,
        definitions: Vec<Arc<IndexerDefinition>>,
    ) -> Arc<Handler> {
        let reasons = existing.restart_reasons(&config, &definitions);
        if reasons.is_empty() {
            existing.reconfigure(config).await;
            return existing;
        }

        tracing::info!(network = %config.name, changed = ?reasons, "settings need a new connection");
        let running = existing.is_running();
        existing.stop().await;
        let handler = self.insert(config, definitions);
        if running {
            handler.start();
        }
        handler
    }

    fn insert(&self, config: NetworkConfig, definitions: Vec<Arc<IndexerDefinition>>) -> Arc<Handler> {
        let handler = Arc::new(Handler::new(config, definitions, self.sink.clone()));
        self.handlers.insert(handler.name().to_string(), handler.clone());
        handler
    }

    pub fn handler(&self, name: &str) -> Option<Arc<Handler>> {
        self.handlers.get(name).map(|h| h.value().clone())
    }

    pub async fn stop_network(&self, name: &str) -> Result<(), SessionError> {
        let handler = self
            .handler(name)
            .ok_or_else(|| SessionError::UnknownNetwork(name.to_string()))?;
        handler.stop().await;
        Ok(())
    }

    pub async fn restart_network(&self, name: &str) -> Result<(), SessionError> {
        let handler = self
            .handler(name)
            .ok_or_else(|| SessionError::UnknownNetwork(name.to_string()))?;
        handler.restart().await;
        Ok(())
    }

    /// Stop a network and forget it.
    pub async fn remove_network(&self, name: &str) -> Result<(), SessionError> {
        let (_, handler) = self
            .handlers
            .remove(name)
            .ok_or_else(|| SessionError::UnknownNetwork(name.to_string()))?;
        handler.stop().await;
        tracing::info!(network = %name, "network removed");
        Ok(())
    }

    /// Send a message through a network's connection.
    pub async fn send_message(&self, network: &str, target: &str, text: &str) -> Result<(), SessionError> {
        let handler = self
            .handler(network)
            .ok_or_else(|| SessionError::UnknownNetwork(network.to_string()))?;
        handler.send_message(target, text).await
    }

    pub async fn stop_all(&self) {
        let mut stops = tokio::task::JoinSet::new();
        for handler in self.handlers.iter().map(|h| h.value().clone()) {
            stops.spawn(async move { handler.stop().await });
        }
        while let Some(result) = stops.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "network stop task failed");
            }
        }
    }

    /// Health of every network, sorted by name.
    pub fn networks_with_health(&self) -> Vec<NetworkHealth> {
        let mut health: Vec<NetworkHealth> = self.handlers.iter().map(|h| h.value().health()).collect();
        health.sort_by(|a, b| a.name.cmp(&b.name));
        health
    }
}
