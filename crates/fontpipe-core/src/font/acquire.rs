//! Binary acquisition: bytes in memory, data URIs and remote URLs all end as one buffer

use std::sync::Arc;

use crate::error::AcquireError;
use crate::font::encoder::decode_data_uri;
use crate::font::{BinarySource, FontFormat};
use crate::traits::Fetcher;

/// Resolve a source to its bytes.
///
/// Empty results are rejected here so nothing downstream ever sees a
/// zero-length font.
pub async fn acquire_binary(
    source: &BinarySource,
    fetcher: &dyn Fetcher,
) -> Result<Arc<[u8]>, AcquireError> {
    let bytes: Arc<[u8]> = match source {
        BinarySource::Bytes { bytes, .. } => Arc::clone(bytes),
        BinarySource::Url(url) => {
            let url = url.trim();
            if url.is_empty() {
                return Err(AcquireError::InvalidUrl { url: url.to_string() });
            }
            if url.starts_with("data:") {
                decode_data_uri(url)
                    .map_err(|e| AcquireError::Unreadable { message: e.to_string() })?
                    .bytes
                    .into()
            } else {
                tracing::debug!("fetching font binary from {}", url);
                fetcher.fetch(url).await?.into()
            }
        }
    };

    if bytes.is_empty() {
        return Err(AcquireError::EmptyPayload);
    }

    tracing::debug!("acquired {} font bytes from {}", bytes.len(), source.describe());
    Ok(bytes)
}

/// Format implied by the extension of a URL or file path.
///
/// Query strings and fragments are ignored.
pub fn format_from_path(path: &str) -> Option<FontFormat> {
    let end = memchr::memchr2(b'?', b'#', path.as_bytes()).unwrap_or(path.len());
    let path = &path.as_bytes()[..end];
    let dot = memchr::memrchr(b'.', path)?;
    if memchr::memchr(b'/', &path[dot..]).is_some() {
        return None;
    }
    let ext = std::str::from_utf8(&path[dot + 1..]).ok()?;
    FontFormat::from_extension(ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_surface::StaticFetcher;
    use futures::executor::block_on;

    #[test]
    fn test_local_bytes_pass_through() {
        let source = BinarySource::Bytes { bytes: vec![1u8, 2, 3].into(), file_name: None };
        let bytes = block_on(acquire_binary(&source, &StaticFetcher::new())).unwrap();
        assert_eq!(&bytes[..], &[1, 2, 3]);
    }

    #[test]
    fn test_empty_bytes_rejected() {
        let source = BinarySource::Bytes { bytes: Vec::<u8>::new().into(), file_name: None };
        let err = block_on(acquire_binary(&source, &StaticFetcher::new())).unwrap_err();
        assert_eq!(err, AcquireError::EmptyPayload);
    }

    #[test]
    fn test_data_uri_is_decoded_without_fetching() {
        let source = BinarySource::Url("data:font/ttf;base64,AAEC".into());
        let bytes = block_on(acquire_binary(&source, &StaticFetcher::new())).unwrap();
        assert_eq!(&bytes[..], &[0, 1, 2]);
    }

    #[test]
    fn test_http_failure_is_surfaced() {
        let fetcher = StaticFetcher::new().with_status("https://cdn.example/字体.ttf", 404, "Not Found");
        let source = BinarySource::Url("https://cdn.example/字体.ttf".into());
        let err = block_on(acquire_binary(&source, &fetcher)).unwrap_err();
        assert_eq!(err, AcquireError::Http { status: 404, status_text: "Not Found".into() });
    }

    #[test]
    fn test_blank_url_is_invalid() {
        let source = BinarySource::Url("   ".into());
        let err = block_on(acquire_binary(&source, &StaticFetcher::new())).unwrap_err();
        assert!(matches!(err, AcquireError::InvalidUrl { .. }));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(format_from_path("/fonts/kai.woff2?v=3#x"), Some(FontFormat::Woff2));
        assert_eq!(format_from_path("https://a.b/楷体.TTF"), Some(FontFormat::Ttf));
        assert_eq!(format_from_path("https://a.b/v1.0/font"), None);
        assert_eq!(format_from_path("noext"), None);
    }
}
