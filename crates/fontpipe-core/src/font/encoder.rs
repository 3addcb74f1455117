//! Byte buffer to `data:` URI conversion

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::constants::ENCODE_CHUNK_SIZE;
use crate::error::EncodeError;
use crate::font::FontFormat;

/// A parsed `data:<mime>;base64,<payload>` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Encode a font binary as a self-contained data URI using the default chunk size
pub fn encode(bytes: &[u8], format: FontFormat) -> Result<String, EncodeError> {
    encode_chunked(bytes, format, ENCODE_CHUNK_SIZE)
}

/// Encode in fixed-size chunks.
///
/// The chunk size is rounded down to a multiple of three so every chunk but
/// the last encodes without padding and the pieces concatenate into one valid
/// base64 string.
pub fn encode_chunked(
    bytes: &[u8],
    format: FontFormat,
    chunk_size: usize,
) -> Result<String, EncodeError> {
    if bytes.is_empty() {
        return Err(EncodeError::EmptyInput);
    }

    let chunk_size = {
        let size = chunk_size.max(3);
        size - size % 3
    };

    let prefix = format!("data:{};base64,", format.mime_type());
    let mut uri = String::with_capacity(prefix.len() + bytes.len().div_ceil(3) * 4);
    uri.push_str(&prefix);

    for chunk in bytes.chunks(chunk_size) {
        BASE64.encode_string(chunk, &mut uri);
    }

    Ok(uri)
}

/// Parse a base64 data URI back into its MIME type and bytes
pub fn decode_data_uri(uri: &str) -> Result<DataUri, EncodeError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| malformed("missing data: scheme"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| malformed("missing ',' separator"))?;
    let header = header
        .strip_suffix(";base64")
        .ok_or_else(|| malformed("payload is not base64"))?;

    let mime_type = header.split(';').next().unwrap_or_default();
    let mime_type = if mime_type.is_empty() {
        "text/plain".to_string()
    } else {
        mime_type.to_ascii_lowercase()
    };

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| EncodeError::InvalidBase64 { message: e.to_string() })?;

    Ok(DataUri { mime_type, bytes })
}

fn malformed(reason: &str) -> EncodeError {
    EncodeError::MalformedDataUri { reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        let mut buf = vec![0u8; len];
        rng.fill(&mut buf[..]);
        buf
    }

    #[test]
    fn test_empty_input_is_explicit_error() {
        assert_eq!(encode(&[], FontFormat::Ttf), Err(EncodeError::EmptyInput));
    }

    #[test]
    fn test_single_byte_round_trip() {
        let uri = encode(&[0xff], FontFormat::Otf).unwrap();
        assert_eq!(uri, "data:font/otf;base64,/w==");
        let decoded = decode_data_uri(&uri).unwrap();
        assert_eq!(decoded.mime_type, "font/otf");
        assert_eq!(decoded.bytes, vec![0xff]);
    }

    #[test]
    fn test_multi_megabyte_round_trip_across_chunks() {
        // not a multiple of the chunk size, so the last chunk is partial
        let bytes = random_bytes(3 * 1024 * 1024 + 17, 7);
        let uri = encode(&bytes, FontFormat::Woff2).unwrap();
        assert!(uri.starts_with("data:font/woff2;base64,"));
        assert_eq!(decode_data_uri(&uri).unwrap().bytes, bytes);
    }

    #[test]
    fn test_chunk_size_does_not_change_output() {
        let bytes = random_bytes(10_000, 11);
        let reference = BASE64.encode(&bytes);
        for chunk in [1, 2, 3, 4, 1000, 1024, 4096, 20_000] {
            let uri = encode_chunked(&bytes, FontFormat::Ttf, chunk).unwrap();
            assert_eq!(uri.strip_prefix("data:font/ttf;base64,").unwrap(), reference, "chunk {chunk}");
        }
    }

    #[test]
    fn test_deterministic() {
        let bytes = random_bytes(2048, 3);
        assert_eq!(encode(&bytes, FontFormat::Ttf), encode(&bytes, FontFormat::Ttf));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(decode_data_uri("font/ttf;base64,AAAA"), Err(EncodeError::MalformedDataUri { .. })));
        assert!(matches!(decode_data_uri("data:font/ttf,AAAA"), Err(EncodeError::MalformedDataUri { .. })));
        assert!(matches!(decode_data_uri("data:font/ttf;base64,@@@"), Err(EncodeError::InvalidBase64 { .. })));
    }
}
