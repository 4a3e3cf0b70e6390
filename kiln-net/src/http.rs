// kiln-net/src/http.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_common::cache::Cache;
use kiln_common::config::Config;
use kiln_common::error::{KilnError, Result};
use kiln_common::model::artifact::{ArtifactRef, LocalArtifact};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};
use url::Url;

use crate::validation::{validate_url, verify_checksum};

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "kiln formula interpreter (Rust)";

/// Produces a verified copy of `artifact` in the download cache.
///
/// A cached file is reused only if it still matches the digest. Otherwise the
/// primary URL and then each mirror is tried in turn; data lands in a hidden
/// temporary file and is renamed to its final name only after the digest
/// matches. `file://` URLs are copied instead of downloaded.
pub async fn fetch_and_verify(artifact: &ArtifactRef, config: &Config) -> Result<LocalArtifact> {
    let cache = Cache::new(config).map_err(|e| {
        KilnError::IoError(format!(
            "Failed to create cache directory {}: {}",
            config.cache_dir().display(),
            e
        ))
    })?;
    let cache_path = cache.artifact_path(&artifact.name);
    debug!(
        "Preparing to fetch '{}' from {} (cache path {})",
        artifact.name,
        artifact.url,
        cache_path.display()
    );

    let urls = artifact
        .urls()
        .map(validate_url)
        .collect::<Result<Vec<Url>>>()?;

    if let Some(cached) = cache.lookup(&artifact.name) {
        match verify_checksum(&cached, &artifact.sha256, &artifact.name) {
            Ok(()) => {
                debug!("Using valid cached file: {}", cached.display());
                return Ok(local(artifact, cached));
            }
            Err(e) => {
                debug!(
                    "Cached file checksum mismatch ({}): {}. Refetching.",
                    cached.display(),
                    e
                );
                if let Err(remove_err) = cache.clear_file(&artifact.name) {
                    debug!("Failed to remove stale cached file: {}", remove_err);
                }
            }
        }
    }

    let client = if urls.iter().any(|url| url.scheme() == "https") {
        Some(build_http_client()?)
    } else {
        None
    };
    let mut last_error: Option<KilnError> = None;
    for url in urls {
        debug!("Attempting fetch from: {}", url);
        let attempt = match &client {
            Some(client) if url.scheme() == "https" => {
                download_and_verify(client, url.as_str(), &cache_path, artifact).await
            }
            _ => copy_local_and_verify(&url, &cache_path, artifact).await,
        };
        match attempt {
            Ok(path) => {
                debug!("Fetched and verified: {}", path.display());
                return Ok(local(artifact, path));
            }
            Err(e) => {
                error!("Fetch attempt failed from {}: {}", url, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        KilnError::DownloadError(
            artifact.name.clone(),
            artifact.url.clone(),
            "All download attempts failed.".to_string(),
        )
    }))
}

fn local(artifact: &ArtifactRef, path: PathBuf) -> LocalArtifact {
    LocalArtifact {
        name: artifact.name.clone(),
        path,
        sha256: artifact.sha256.to_ascii_lowercase(),
    }
}

fn build_http_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    Client::builder()
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| KilnError::HttpError(format!("Failed to build HTTP client: {e}")))
}

fn temp_path_for(final_path: &Path) -> PathBuf {
    let temp_filename = format!(
        ".{}.download",
        final_path.file_name().unwrap_or_default().to_string_lossy()
    );
    let temp_path = final_path.with_file_name(temp_filename);
    if temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            warn!(
                "Could not remove existing temporary file {}: {}",
                temp_path.display(),
                e
            );
        }
    }
    temp_path
}

// Verifies the temporary file and moves it into place. A file that fails
// verification is deleted.
fn finish(temp_path: &Path, final_path: &Path, artifact: &ArtifactRef) -> Result<PathBuf> {
    if let Err(e) = verify_checksum(temp_path, &artifact.sha256, &artifact.name) {
        let _ = fs::remove_file(temp_path);
        return Err(e);
    }
    debug!("Checksum verified for temporary file: {}", temp_path.display());
    fs::rename(temp_path, final_path).map_err(|e| {
        KilnError::IoError(format!(
            "Failed to move temp file {} to {}: {}",
            temp_path.display(),
            final_path.display(),
            e
        ))
    })?;
    debug!("Moved verified file to final location: {}", final_path.display());
    Ok(final_path.to_path_buf())
}

async fn copy_local_and_verify(
    url: &Url,
    final_path: &Path,
    artifact: &ArtifactRef,
) -> Result<PathBuf> {
    let source = url.to_file_path().map_err(|_| {
        KilnError::ValidationError(format!("'{url}' does not name a local file"))
    })?;
    let temp_path = temp_path_for(final_path);
    debug!("Copying {} to {}", source.display(), temp_path.display());
    tokio::fs::copy(&source, &temp_path).await.map_err(|e| {
        KilnError::DownloadError(
            artifact.name.clone(),
            url.to_string(),
            format!("Failed to copy {}: {}", source.display(), e),
        )
    })?;
    finish(&temp_path, final_path, artifact)
}

async fn download_and_verify(
    client: &Client,
    url: &str,
    final_path: &Path,
    artifact: &ArtifactRef,
) -> Result<PathBuf> {
    let temp_path = temp_path_for(final_path);
    debug!("Downloading to temporary path: {}", temp_path.display());

    let response = client.get(url).send().await.map_err(|e| {
        debug!("HTTP request failed for {url}: {e}");
        KilnError::HttpError(format!("HTTP request failed for {url}: {e}"))
    })?;
    let status = response.status();
    debug!("Received HTTP status: {} for {}", status, url);

    if !status.is_success() {
        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read response body".to_string());
        error!("HTTP error {} for URL {}: {}", status, url, body_text);
        return match status {
            StatusCode::NOT_FOUND => Err(KilnError::DownloadError(
                artifact.name.clone(),
                url.to_string(),
                "Resource not found (404)".to_string(),
            )),
            StatusCode::FORBIDDEN => Err(KilnError::DownloadError(
                artifact.name.clone(),
                url.to_string(),
                "Access forbidden (403)".to_string(),
            )),
            _ => Err(KilnError::HttpError(format!(
                "HTTP error {status} for URL {url}: {body_text}"
            ))),
        };
    }

    let mut temp_file = TokioFile::create(&temp_path).await.map_err(|e| {
        KilnError::IoError(format!(
            "Failed to create temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;
    let content = response
        .bytes()
        .await
        .map_err(|e| KilnError::HttpError(format!("Failed to read response body bytes: {e}")))?;
    temp_file.write_all(&content).await.map_err(|e| {
        KilnError::IoError(format!(
            "Failed to write download stream to {}: {}",
            temp_path.display(),
            e
        ))
    })?;
    temp_file.flush().await?;
    drop(temp_file);
    debug!("Finished writing download stream to temp file.");

    finish(&temp_path, final_path, artifact)
}
