//! Syntactic checks on stream URLs submitted by an admin.  Nothing here
//! touches the network; reachability is the prober's job.

use url::Url;

use crate::error::{ContextDetails, ErrorMetadata, OpaqueError, RadioError, RadioErrorHandler, RadioErrorKind};

pub const MAX_URL_LENGTH: usize = 2048;

/// Extensions that point at a web page or an image rather than audio.
const REJECTED_EXTENSIONS: &[&str] = &[".html", ".htm", ".php", ".jpg", ".png", ".gif", ".pdf"];

/// Validate one URL field of the settings form.  Returns the parsed URL.
pub fn validate_stream_url(field: &str, raw: &str, details: &ContextDetails) -> Result<Url, RadioError> {
    let fail = |kind: RadioErrorKind, message: String| {
        let original = OpaqueError::new("ValidationError", message);
        RadioErrorHandler::create_error(
            kind,
            "validate_stream_url",
            Some(&original),
            ContextDetails {
                metadata: ErrorMetadata::Form {
                    field: field.to_string(),
                },
                ..details.clone()
            },
        )
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(fail(
            RadioErrorKind::RequiredFieldMissing,
            format!("{} is required", field),
        ));
    }
    if trimmed.len() > MAX_URL_LENGTH {
        return Err(fail(
            RadioErrorKind::UrlTooLong,
            format!("{} is {} characters, max {}", field, trimmed.len(), MAX_URL_LENGTH),
        ));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| fail(RadioErrorKind::InvalidUrl, format!("invalid url {:?}: {}", trimmed, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(fail(
            RadioErrorKind::InvalidProtocol,
            format!("unsupported scheme {:?}", url.scheme()),
        ));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => {
            return Err(fail(
                RadioErrorKind::InvalidHostname,
                format!("{} has no hostname", trimmed),
            ))
        }
    }

    let path = url.path().to_ascii_lowercase();
    if let Some(ext) = REJECTED_EXTENSIONS.iter().find(|ext| path.ends_with(*ext)) {
        return Err(fail(
            RadioErrorKind::UnsupportedFormat,
            format!("{} files are not audio streams", ext),
        ));
    }

    Ok(url)
}
