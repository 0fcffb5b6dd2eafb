use std::path::Path;

use offload_protocol::{DestinationMeta, PayloadDescriptor};

use crate::TransferError;

/// Checks that a descriptor can be turned into a well-formed request.
///
/// Rejects:
/// - Empty names, `.`/`..`, or names containing path separators
/// - Media types without a `type/subtype` shape
/// - Metadata keys that are empty or not plain ASCII tokens
pub fn validate_descriptor(
    payload: &PayloadDescriptor,
    destination: &DestinationMeta,
) -> Result<(), TransferError> {
    let name = payload.name.as_str();
    if name.is_empty() {
        return Err(TransferError::InvalidDescriptor("empty name".into()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(TransferError::InvalidDescriptor(format!(
            "name must be a plain file name: {name}"
        )));
    }

    let media_type = payload.media_type.as_str();
    let well_formed = media_type
        .split_once('/')
        .is_some_and(|(ty, sub)| !ty.is_empty() && !sub.is_empty())
        && !media_type.chars().any(|c| c.is_whitespace() || c.is_control());
    if !well_formed {
        return Err(TransferError::InvalidDescriptor(format!(
            "malformed media type: {media_type:?}"
        )));
    }

    for (key, _) in destination.iter() {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(TransferError::InvalidDescriptor(format!(
                "invalid metadata key: {key:?}"
            )));
        }
    }

    Ok(())
}

/// Guesses a media type from a file extension.
pub fn detect_media_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
