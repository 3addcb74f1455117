#![no_main]
use libfuzzer_sys::fuzz_target;

use fontpipe_core::font::{decode_data_uri, encode_chunked};
use fontpipe_core::FontFormat;

const FORMATS: [FontFormat; 4] = [FontFormat::Ttf, FontFormat::Otf, FontFormat::Woff, FontFormat::Woff2];

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeouts
    let data = if data.len() > 64 * 1024 { &data[..64 * 1024] } else { data };

    // Arbitrary text must never panic the parser
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decode_data_uri(text);
    }

    let Some((&selector, payload)) = data.split_first() else {
        return;
    };
    let format = FORMATS[selector as usize % FORMATS.len()];
    let chunk = 1 + (selector as usize) * 7;

    match encode_chunked(payload, format, chunk) {
        Ok(uri) => {
            let decoded = decode_data_uri(&uri).expect("encoder output must decode");
            assert_eq!(decoded.bytes, payload);
            assert_eq!(decoded.mime_type, format.mime_type());
        }
        Err(_) => assert!(payload.is_empty(), "only empty input may fail to encode"),
    }
});
