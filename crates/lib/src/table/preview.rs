use super::parse::{build_preview, TablePreview};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("Failed to load table preview (status {0})")]
    Status(u16),
    #[error("Failed to load table preview: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Failed to parse table preview: {0}")]
    Parse(#[from] csv::Error),
}

/// Source of table artifact bodies.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, PreviewError>;
}

/// Fetches artifacts with a client that has no cookie store: artifact URLs are pre-signed,
/// and session credentials must not leak to the storage host.
#[derive(Clone, Default)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
}

impl HttpArtifactFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, PreviewError> {
        let res = self.client.get(url).send().await?;
        if !res.status().is_success() {
            return Err(PreviewError::Status(res.status().as_u16()));
        }
        Ok(res.text().await?)
    }
}

/// Fetch a table artifact and build its bounded preview.
pub async fn load_preview(fetcher: &dyn ArtifactFetcher, url: &str) -> Result<TablePreview, PreviewError> {
    let text = fetcher.fetch_text(url).await?;
    Ok(build_preview(&text)?)
}
