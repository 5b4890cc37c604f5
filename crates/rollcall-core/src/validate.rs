//! Input validation for registration fields and photos, plus HTML escaping
//! of identity strings that downstream consumers may render as markup.

use image::ImageFormat;
use std::path::Path;
use thiserror::Error;

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 50;
const ID_MAX_CHARS: usize = 20;
/// Largest accepted registration photo (5 MiB).
pub const MAX_PHOTO_BYTES: u64 = 5 * 1024 * 1024;
const ALLOWED_PHOTO_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(
        "name must be 2-50 characters long and contain only letters, spaces, hyphens, and apostrophes"
    )]
    InvalidName,
    #[error("ID must be alphanumeric (plus '-' or '_') and up to 20 characters")]
    InvalidId,
    #[error("please select an image file")]
    MissingPhoto,
    #[error("please select a valid image file (JPEG, PNG, or WebP)")]
    UnsupportedPhoto,
    #[error("image file size must be less than 5MB (got {0} bytes)")]
    PhotoTooLarge(u64),
    #[error("reading photo: {0}")]
    Io(#[from] std::io::Error),
}

/// Validate a display name and return it trimmed.
pub fn validate_name(name: &str) -> Result<&str, ValidationError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    let charset_ok = trimmed
        .chars()
        .all(|c| c.is_ascii_alphabetic() || c.is_whitespace() || c == '\'' || c == '-');

    if (NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&len) && charset_ok {
        Ok(trimmed)
    } else {
        Err(ValidationError::InvalidName)
    }
}

/// Validate an optional external ID. Blank input means "no ID".
pub fn validate_id(id: &str) -> Result<Option<&str>, ValidationError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let charset_ok = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if trimmed.chars().count() <= ID_MAX_CHARS && charset_ok {
        Ok(Some(trimmed))
    } else {
        Err(ValidationError::InvalidId)
    }
}

/// Check that a photo's bytes are a JPEG, PNG, or WebP image within the size cap.
pub fn validate_photo_bytes(bytes: &[u8]) -> Result<ImageFormat, ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::MissingPhoto);
    }
    let len = bytes.len() as u64;
    if len > MAX_PHOTO_BYTES {
        return Err(ValidationError::PhotoTooLarge(len));
    }
    let format = image::guess_format(bytes).map_err(|_| ValidationError::UnsupportedPhoto)?;
    if ALLOWED_PHOTO_FORMATS.contains(&format) {
        Ok(format)
    } else {
        Err(ValidationError::UnsupportedPhoto)
    }
}

/// Validate a registration photo on disk. The size cap is checked before reading.
pub fn validate_photo(path: &Path) -> Result<ImageFormat, ValidationError> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ValidationError::MissingPhoto,
        _ => ValidationError::Io(e),
    })?;
    if meta.len() > MAX_PHOTO_BYTES {
        return Err(ValidationError::PhotoTooLarge(meta.len()));
    }
    let bytes = std::fs::read(path)?;
    validate_photo_bytes(&bytes)
}

/// Escape `<`, `>`, `"`, `'` and `&` as HTML entities.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '&' => out.push_str("&amp;"),
            other => out.push(other),
        }
    }
    out
}
