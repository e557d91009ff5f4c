//! REST client for the task-list service
//!
//! `ItemApi` is the transport seam: six calls, each presenting the revision
//! the caller believes is current and returning the server's authoritative
//! payload together with the new revision. `HttpItemApi` implements it over
//! HTTPS with a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::error::RemoteError;
use super::wire::{ItemEnvelope, ListEnvelope};
use crate::config::Config;
use crate::models::Item;

/// Header carrying the client's last known list revision
pub const REVISION_HEADER: &str = "X-Last-Known-Revision";

/// Payload plus the list revision the server returned with it
pub type Revisioned<T> = (T, u32);

/// Remote operations on the task list
#[async_trait]
pub trait ItemApi: Send + Sync {
    async fn fetch_list(&self, revision: u32) -> Result<Revisioned<Vec<Item>>, RemoteError>;

    /// Bulk upsert; the server merges and returns the result
    async fn replace_list(
        &self,
        items: &[Item],
        revision: u32,
    ) -> Result<Revisioned<Vec<Item>>, RemoteError>;

    async fn fetch_item(&self, id: &str, revision: u32) -> Result<Revisioned<Item>, RemoteError>;

    async fn create_item(&self, item: &Item, revision: u32)
        -> Result<Revisioned<Item>, RemoteError>;

    async fn replace_item(
        &self,
        item: &Item,
        revision: u32,
    ) -> Result<Revisioned<Item>, RemoteError>;

    async fn delete_item(&self, item: &Item, revision: u32)
        -> Result<Revisioned<Item>, RemoteError>;
}

/// `ItemApi` over HTTPS
#[derive(Debug, Clone)]
pub struct HttpItemApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpItemApi {
    pub fn new(
        base_url: &str,
        token: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Build from the API URL, token and timeouts in `config`
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        Self::new(
            &config.api_url,
            config.token.as_deref().unwrap_or_default(),
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/todo/list{}", self.base_url, path)
    }

    async fn send<B, R>(
        &self,
        method: Method,
        path: &str,
        revision: u32,
        body: Option<&B>,
    ) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%method, %url, revision, "Sending request");

        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token)
            .header(REVISION_HEADER, revision.to_string());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RemoteError::from_status(status.as_u16()));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::TransportFailed(format!("undecodable response: {}", e)))
    }
}

#[async_trait]
impl ItemApi for HttpItemApi {
    async fn fetch_list(&self, revision: u32) -> Result<Revisioned<Vec<Item>>, RemoteError> {
        let envelope: ListEnvelope = self.send::<(), _>(Method::GET, "", revision, None).await?;
        Ok((envelope.list, envelope.revision))
    }

    async fn replace_list(
        &self,
        items: &[Item],
        revision: u32,
    ) -> Result<Revisioned<Vec<Item>>, RemoteError> {
        let body = ListEnvelope::request(items.to_vec(), revision);
        let envelope: ListEnvelope = self
            .send(Method::PATCH, "", revision, Some(&body))
            .await?;
        Ok((envelope.list, envelope.revision))
    }

    async fn fetch_item(&self, id: &str, revision: u32) -> Result<Revisioned<Item>, RemoteError> {
        let envelope: ItemEnvelope = self
            .send::<(), _>(Method::GET, &format!("/{}", id), revision, None)
            .await?;
        Ok((envelope.element, envelope.revision))
    }

    async fn create_item(
        &self,
        item: &Item,
        revision: u32,
    ) -> Result<Revisioned<Item>, RemoteError> {
        let body = ItemEnvelope::request(item.clone(), revision);
        let envelope: ItemEnvelope = self.send(Method::POST, "", revision, Some(&body)).await?;
        Ok((envelope.element, envelope.revision))
    }

    async fn replace_item(
        &self,
        item: &Item,
        revision: u32,
    ) -> Result<Revisioned<Item>, RemoteError> {
        let body = ItemEnvelope::request(item.clone(), revision);
        let envelope: ItemEnvelope = self
            .send(Method::PUT, &format!("/{}", item.id), revision, Some(&body))
            .await?;
        Ok((envelope.element, envelope.revision))
    }

    async fn delete_item(
        &self,
        item: &Item,
        revision: u32,
    ) -> Result<Revisioned<Item>, RemoteError> {
        let body = ItemEnvelope::request(item.clone(), revision);
        let envelope: ItemEnvelope = self
            .send(Method::DELETE, &format!("/{}", item.id), revision, Some(&body))
            .await?;
        Ok((envelope.element, envelope.revision))
    }
}
