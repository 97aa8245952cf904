use std::hash::{DefaultHasher, Hash, Hasher};

use regex::Regex;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::clients::{DownloadedImage, SourceApi, TargetApi};
use crate::config::CommentConfig;

fn img_tag_pattern() -> Regex {
    Regex::new(r#"(?is)<img\s+(?:[^>]*?\s+)?src\s*=\s*["']([^"']+)["'][^>]*>"#)
        .expect("valid image tag regex")
}

/// Rewrite embedded `<img>` tags in an HTML blob so they point at blobs
/// re-hosted on the target. Must run before HTML→Markdown conversion so the
/// rewritten references survive. Any per-image failure substitutes the
/// configured placeholder instead of aborting the whole text.
pub async fn migrate_images_in_html(
    html: &str,
    source: &dyn SourceApi,
    target: &dyn TargetApi,
    retry: &RetryPolicy,
    cfg: &CommentConfig,
) -> String {
    if html.is_empty() || !cfg.migrate_images {
        return html.to_string();
    }
    let matches: Vec<(usize, usize, String)> = img_tag_pattern()
        .captures_iter(html)
        .filter_map(|c| {
            let whole = c.get(0)?;
            Some((whole.start(), whole.end(), c.get(1)?.as_str().to_string()))
        })
        .collect();
    if matches.is_empty() {
        return html.to_string();
    }
    debug!("Found {} image tags to process", matches.len());

    let mut out = String::with_capacity(html.len());
    let mut last_end = 0;
    for (start, end, url) in matches {
        out.push_str(&html[last_end..start]);
        let lower = url.to_lowercase();
        if lower.contains("gitlab") && lower.contains("/uploads/") {
            debug!("Skipping already migrated image URL: {url}");
            out.push_str(&html[start..end]);
        } else if !lower.starts_with("http:") && !lower.starts_with("https:") {
            debug!("Skipping non-HTTP(S) image URL: {url}");
            out.push_str(&html[start..end]);
        } else {
            out.push_str(&migrate_one_image(&url, source, target, retry, cfg).await);
        }
        last_end = end;
    }
    out.push_str(&html[last_end..]);
    out
}

async fn migrate_one_image(
    url: &str,
    source: &dyn SourceApi,
    target: &dyn TargetApi,
    retry: &RetryPolicy,
    cfg: &CommentConfig,
) -> String {
    let placeholder = cfg.image_placeholder.replace("{url}", url);
    info!("Processing embedded image: {url}");
    let image = match source.download_image(url, cfg.max_image_bytes).await {
        Ok(image) => image,
        Err(e) => {
            warn!("Failed to download image {url}: {e}. Using placeholder.");
            return placeholder;
        }
    };
    let filename = upload_filename(&image, url);
    match retry
        .call(&format!("upload image {filename}"), || {
            target.upload_attachment(&filename, &image.bytes)
        })
        .await
    {
        Ok(Some(markdown)) => {
            info!("Migrated image {url} -> {markdown}");
            markdown
        }
        Ok(None) => placeholder,
        Err(e) => {
            warn!("Failed to upload image {url}: {e}. Using placeholder.");
            placeholder
        }
    }
}

fn upload_filename(image: &DownloadedImage, url: &str) -> String {
    if let Some(sanitized) = image
        .filename
        .as_deref()
        .map(sanitize_filename)
        .filter(|s| !s.is_empty() && *s != "_")
    {
        return sanitized;
    }
    // Fallback name derived from the URL so re-runs produce the same name.
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    format!(
        "migrated_image_{:08x}{}",
        hasher.finish() as u32,
        extension_for(&image.content_type)
    )
}

fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        t if t.contains("jpeg") => ".jpg",
        t if t.contains("gif") => ".gif",
        t if t.contains("bmp") => ".bmp",
        t if t.contains("webp") => ".webp",
        _ => ".png",
    }
}
