//! Meilisearch index client
//!
//! Only the three calls a load needs: delete all documents, add documents
//! (batched) and the health check. Indexing tasks are enqueued by the server;
//! completion is not awaited.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use tracing::debug;
use url::Url;

use crate::error::{AdapterError, EltError};

use super::{AdapterResult, Document, SearchIndex};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default documents per `POST /indexes/{index}/documents`
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

pub struct MeiliIndex {
    client: Client,
    base: Url,
    api_key: Option<String>,
    batch_size: usize,
}

impl MeiliIndex {
    pub fn new(url: &str, api_key: Option<String>, batch_size: usize) -> Result<Self, EltError> {
        let base = parse_base(url)?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("recsis-elt/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EltError::InvalidEndpoint {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            base,
            api_key,
            batch_size: batch_size.max(1),
        })
    }

    fn endpoint(&self, path: &str) -> AdapterResult<Url> {
        self.base
            .join(path)
            .map_err(|e| AdapterError::Other(format!("cannot build URL for '{path}': {e}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Base URL with a trailing slash so relative joins keep any path prefix
fn parse_base(url: &str) -> Result<Url, EltError> {
    let invalid = |reason: String| EltError::InvalidEndpoint {
        url: url.to_string(),
        reason,
    };

    let mut base = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

async fn check(index: &str, response: Response) -> AdapterResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response.text().await.unwrap_or_default();
    Err(AdapterError::SearchRejected {
        index: index.to_string(),
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl SearchIndex for MeiliIndex {
    async fn clear_index(&self, index: &str) -> AdapterResult<()> {
        let url = self.endpoint(&format!("indexes/{index}/documents"))?;
        let response = self.authorized(self.client.delete(url)).send().await?;
        check(index, response).await
    }

    async fn add_documents(
        &self,
        index: &str,
        documents: &[Document],
        primary_key: Option<&str>,
    ) -> AdapterResult<()> {
        let mut url = self.endpoint(&format!("indexes/{index}/documents"))?;
        if let Some(key) = primary_key {
            url.query_pairs_mut().append_pair("primaryKey", key);
        }

        for batch in documents.chunks(self.batch_size) {
            let request = self.client.post(url.clone()).json(batch);
            let response = self.authorized(request).send().await?;
            check(index, response).await?;
            debug!(index, documents = batch.len(), "batch enqueued");
        }
        Ok(())
    }

    async fn health(&self) -> AdapterResult<()> {
        let url = self.endpoint("health")?;
        let response = self.client.get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AdapterError::Connection(format!(
                "health check answered {}",
                response.status()
            )))
        }
    }
}
