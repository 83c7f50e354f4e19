//! Dated copies of the sample log in S3.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::analyzers::writetos3::upload_bytes;

/// Gzip-compresses a buffer.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Object key of the backup taken on `date`.
pub fn backup_key(date: NaiveDate, gzip: bool) -> String {
    let suffix = if gzip { ".gz" } else { "" };
    format!("backup/operation_raw_{}.csv{}", date.format("%Y-%m-%d"), suffix)
}

/// Uploads the log at `path` under [`backup_key`] and returns the key.
#[tracing::instrument(skip(client, path), fields(path = %path.display()))]
pub async fn backup_log(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    path: &Path,
    date: NaiveDate,
    gzip_body: bool,
) -> Result<String> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let (body, content_type) = if gzip_body {
        (gzip(&contents)?, "application/gzip")
    } else {
        (contents, "text/csv")
    };
    let key = backup_key(date, gzip_body);

    upload_bytes(client, bucket, &key, body, content_type).await?;

    info!(bucket, key = %key, "Backup uploaded");
    Ok(key)
}
