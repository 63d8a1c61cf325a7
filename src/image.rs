use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::ImageError;
use crate::models::ImageRef;

/// Upper bound on the decoded image size accepted for upload (2.5 MiB).
pub const MAX_IMAGE_BYTES: usize = 2_621_440;

const DEFAULT_MIME: &str = "image/jpeg";

/// An image that is ready to be sent to the vision model.
///
/// Resizing and re-encoding happen before this point; here we only enforce the bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedImage {
    mime_type: String,
    bytes: Vec<u8>,
}

impl PreparedImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageError::TooLarge {
                size: bytes.len(),
                limit: MAX_IMAGE_BYTES,
            });
        }
        Ok(Self {
            mime_type: mime_type.into(),
            bytes,
        })
    }

    /// Parses `data:<mime>[;params];base64,<payload>`. A bare base64 payload is taken as JPEG.
    ///
    /// Only the media type itself is kept; parameters such as `charset` are dropped.
    pub fn from_data_url(data_url: &str) -> Result<Self, ImageError> {
        let (mime_type, payload) = match data_url.split_once(',') {
            Some((header, payload)) => {
                let mime = header
                    .strip_prefix("data:")
                    .and_then(|rest| rest.split(';').next())
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_MIME);
                (mime, payload)
            }
            None => (DEFAULT_MIME, data_url),
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        Self::from_bytes(mime_type, bytes)
    }

    /// Guesses the MIME type from a file extension, defaulting to JPEG.
    pub fn mime_for_extension(ext: &str) -> &'static str {
        match ext.to_ascii_lowercase().as_str() {
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            "heic" => "image/heic",
            _ => DEFAULT_MIME,
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Handle stored on the user message that carries this image.
    pub fn reference(&self) -> ImageRef {
        ImageRef(format!("data:{};base64,{}", self.mime_type, self.base64()))
    }
}
