// src/services/image_resolver.rs
//
// Turns a meal name into a displayable image, at most once per distinct
// name per session: cache lookup first, then generate -> fetch -> re-encode
// -> record.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

use super::metrics_manager::MetricsManager;
use super::openai::{LlmError, OpenAiClient};
use super::session_manager::{ImageAsset, SessionManager};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Generation(#[from] LlmError),
    #[error("image fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("image fetch returned status {0}")]
    FetchStatus(StatusCode),
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

fn image_prompt(meal: &str) -> String {
    format!("A professional food photography of {meal}, high quality, appetizing")
}

#[derive(Debug, Clone)]
pub struct ImageResolver {
    llm: OpenAiClient,
    cache_dir: Option<PathBuf>,
}

impl ImageResolver {
    pub fn new(llm: OpenAiClient, cache_dir: Option<PathBuf>) -> Self {
        Self { llm, cache_dir }
    }

    /// Resolve a meal name to its image within a session.
    ///
    /// A name already present in the session's image index is returned
    /// immediately with no network call. Otherwise one image is generated,
    /// fetched from its hosted URL, re-encoded to PNG, recorded into the
    /// session, and optionally mirrored to the on-disk cache directory.
    ///
    /// Failures leave the session's image index untouched; the meal stays
    /// in the catalog without an image.
    pub async fn resolve(
        &self,
        sessions: &SessionManager,
        session_id: &str,
        meal: &str,
        metrics: &MetricsManager,
    ) -> Result<ImageAsset, GenerationError> {
        if let Some(asset) = sessions.get_image(session_id, meal).await {
            debug!(%meal, "image cache hit");
            metrics.record_cache_hit().await;
            return Ok(asset);
        }

        let url = self.llm.generate_image(&image_prompt(meal)).await?;
        let bytes = self.fetch(&url).await?;
        let png = reencode_png(&bytes)?;

        if let Some(dir) = &self.cache_dir {
            // Disk mirror is best-effort; the in-session asset is the
            // source of truth.
            if let Err(e) = save_to_disk(dir, meal, &png).await {
                warn!(%meal, error = %e, "failed to write image cache file");
            }
        }

        let asset = ImageAsset {
            mime_type: "image/png".to_string(),
            data: BASE64.encode(&png),
        };
        sessions.record_image(session_id, meal, asset.clone()).await;
        metrics.record_generation().await;
        debug!(%meal, bytes = png.len(), "image generated and recorded");
        Ok(asset)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, GenerationError> {
        let response = self.llm.http().get(url).send().await?;
        if !response.status().is_success() {
            return Err(GenerationError::FetchStatus(response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Decode whatever the image service returned and re-encode as PNG.
fn reencode_png(bytes: &[u8]) -> Result<Vec<u8>, GenerationError> {
    let decoded = image::load_from_memory(bytes)?;
    let mut out = Cursor::new(Vec::new());
    decoded.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

async fn save_to_disk(dir: &Path, meal: &str, png: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.png", sanitize_file_name(meal)));
    tokio::fs::write(path, png).await
}

fn sanitize_file_name(meal: &str) -> String {
    let name: String = meal
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        "meal".to_string()
    } else {
        name
    }
}
