//! HTTP client for the hosted store's REST dialect.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::AUTHORIZATION;
use tokio::sync::mpsc;

use super::realtime::RealtimeConfig;
use super::realtime::RealtimeStream;
use super::MachineStore;
use super::StoreError;
use super::Subscription;
use crate::config::StoreConfig;
use crate::machine::Machine;
use crate::machine::StatusUpdate;

/// Capacity of the subscription channel. The monitor drains it promptly;
/// this only buffers bursts around a refresh cycle.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Store client speaking the hosted service's PostgREST dialect for reads
/// and writes, with change events delivered over its realtime websocket.
pub struct RestStore {
    client: reqwest::Client,
    rows_url: String,
    realtime: RealtimeConfig,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(&config.api_key)?);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let base = config.url.trim_end_matches('/');
        let rows_url = format!("{}/rest/v1/{}", base, config.table);

        Ok(Self {
            client,
            rows_url,
            realtime: RealtimeConfig::from_store_config(config),
        })
    }
}

#[async_trait]
impl MachineStore for RestStore {
    async fn fetch_all(&self) -> Result<Vec<Machine>, StoreError> {
        let response = self
            .client
            .get(&self.rows_url)
            .query(&[("select", "*"), ("order", "id.asc")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Response {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    async fn upsert(&self, updates: &[StatusUpdate]) -> Result<(), StoreError> {
        let response = self
            .client
            .post(&self.rows_url)
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(updates)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Response {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let task = RealtimeStream::spawn(self.realtime.clone(), tx);
        Ok(Subscription::new(rx, Some(task)))
    }
}
