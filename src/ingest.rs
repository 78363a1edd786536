//! Local image enumeration and loading.
//!
//! Images are read from a flat directory. Each one is turned into an
//! `ImagePayload`: the bytes as a base64 `data:` URL plus a SHA-256 digest so
//! a stored record can be matched to the exact input that produced it.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use base64::Engine as _;
use image::ImageFormat;
use sha2::{Digest, Sha256};

/// File extensions picked up from the images directory (case-insensitive).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "webp", "png"];

/// List supported images in `dir`, sorted by file name. Not recursive.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read images directory {}", dir.display()))?;
    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && has_supported_extension(&path) {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

/// One image ready to be sent to a backend.
#[derive(Clone, Debug)]
pub struct ImagePayload {
    pub path: PathBuf,
    /// File name, e.g. `room.webp`.
    pub name: String,
    pub mime_type: &'static str,
    pub data_url: String,
    /// Hex SHA-256 of the raw bytes.
    pub sha256: String,
    pub byte_len: usize,
}

impl ImagePayload {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        Self::from_bytes(path, bytes)
    }

    pub fn from_bytes(path: &Path, bytes: Vec<u8>) -> Result<Self> {
        let mime_type = mime_type_for(path, &bytes)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        Ok(Self {
            path: path.to_path_buf(),
            name: file_name(path),
            mime_type,
            data_url: format!("data:{};base64,{}", mime_type, encoded),
            sha256: hex::encode(Sha256::digest(&bytes)),
            byte_len: bytes.len(),
        })
    }
}

/// MIME type from the extension, falling back to sniffing the content.
pub fn mime_type_for(path: &Path, bytes: &[u8]) -> Result<&'static str> {
    let format = ImageFormat::from_path(path)
        .ok()
        .and_then(supported_mime)
        .or_else(|| image::guess_format(bytes).ok().and_then(supported_mime));
    format.ok_or_else(|| anyhow!("unsupported image format: {}", path.display()))
}

fn supported_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::Png => Some("image/png"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
