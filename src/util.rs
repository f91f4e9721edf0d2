use anyhow::{anyhow, Context, Result};

/// Fetch image bytes from an http(s) URL or a plain filesystem path.
/// Local paths show up when the disk uploader's base URL is the output
/// directory itself.
pub async fn fetch_bytes(url: &str) -> Result<Vec<u8>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        let resp = reqwest::get(url)
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        if !resp.status().is_success() {
            return Err(anyhow!("Fetch of {} returned status {}", url, resp.status()));
        }
        Ok(resp.bytes().await?.to_vec())
    } else {
        tokio::fs::read(url)
            .await
            .with_context(|| format!("Failed to read {}", url))
    }
}

/// Best-effort MIME type from a URL's extension; image generators serve
/// JPEGs and PNGs almost exclusively.
pub fn guess_mime(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/png"
    }
}
