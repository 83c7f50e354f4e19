mod basic;
mod client;

pub use basic::StatusClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::debug;

/// GETs `url` and returns the body. Non-2xx responses are errors.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid URL '{url}'"))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    let body = resp.bytes().await?;
    debug!(url, bytes = body.len(), "Fetched status payload");
    Ok(body)
}

/// Loads a payload from an `http(s)://` URL or a local file path.
#[tracing::instrument(skip(client))]
pub async fn load_source<C: HttpClient>(client: &C, source: &str) -> Result<Bytes> {
    if source.starts_with("http://") || source.starts_with("https://") {
        fetch_bytes(client, source).await
    } else {
        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read status payload from {source}"))?;
        Ok(Bytes::from(bytes))
    }
}
