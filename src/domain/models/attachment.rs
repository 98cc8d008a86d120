#[cfg(test)]
#[path = "attachment_test.rs"]
mod tests;

use std::path::Path;

use anyhow::bail;
use anyhow::Result;
use base64::engine::general_purpose;
use base64::Engine as _;
use serde_derive::Deserialize;
use serde_derive::Serialize;

/// A file sent alongside a prompt, carried as a base64 data URL so it can
/// travel inside a single text frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub data: String,
    pub mime: String,
}

impl Attachment {
    pub fn new(bytes: &[u8], mime: &str) -> Attachment {
        let encoded = general_purpose::STANDARD.encode(bytes);
        return Attachment {
            data: format!("data:{mime};base64,{encoded}"),
            mime: mime.to_string(),
        };
    }

    pub async fn from_file(file_path: &Path) -> Result<Attachment> {
        if !file_path.exists() {
            bail!(format!("No file found at {}", file_path.display()));
        }

        let bytes = tokio::fs::read(file_path).await?;
        let extension = file_path
            .extension()
            .map(|e| {
                return e.to_string_lossy().to_lowercase();
            })
            .unwrap_or_default();

        return Ok(Attachment::new(&bytes, mime_for_extension(&extension)));
    }
}

fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "gif" => return "image/gif",
        "jpeg" | "jpg" => return "image/jpeg",
        "json" => return "application/json",
        "md" | "txt" => return "text/plain",
        "pdf" => return "application/pdf",
        "png" => return "image/png",
        "webp" => return "image/webp",
        _ => return "application/octet-stream",
    }
}
