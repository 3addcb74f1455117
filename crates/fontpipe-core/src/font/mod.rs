//! Font provisioning pipeline
//!
//! Acquisition, encoding, registration, verification and forced fallback for
//! user-supplied font files, tied together by the deduplicating load cache.

pub mod acquire;
pub mod cache;
pub mod encoder;
pub mod fallback;
pub mod naming;
pub mod register;
pub mod verify;

pub use acquire::{acquire_binary, format_from_path};
pub use cache::FontLoader;
pub use encoder::{decode_data_uri, encode, encode_chunked, DataUri};
pub use fallback::{FallbackForcer, ForcedFallback};
pub use naming::{css_class_name, safe_quote, FamilyMinter};
pub use register::Registrar;
pub use verify::{Signals, Verifier};

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::constants::{CHARACTER_FALLBACK_STACK, PINYIN_FALLBACK_STACK};
use crate::error::AcquireError;

/// Whether the family a deferred task belongs to is still owned by its loader.
///
/// Checked after every suspension point and inside timers so a released
/// family gets no new nodes, faces or events.
pub type Liveness = Rc<dyn Fn() -> bool>;

/// Font container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontFormat {
    Ttf,
    Otf,
    Woff,
    Woff2,
}

impl FontFormat {
    /// Parse a file extension (case-insensitive, without the dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ttf" => Some(FontFormat::Ttf),
            "otf" => Some(FontFormat::Otf),
            "woff" => Some(FontFormat::Woff),
            "woff2" => Some(FontFormat::Woff2),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FontFormat::Ttf => "ttf",
            FontFormat::Otf => "otf",
            FontFormat::Woff => "woff",
            FontFormat::Woff2 => "woff2",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            FontFormat::Ttf => "font/ttf",
            FontFormat::Otf => "font/otf",
            FontFormat::Woff => "font/woff",
            FontFormat::Woff2 => "font/woff2",
        }
    }

    /// Value for the CSS `format()` hint of a `src` descriptor
    pub fn css_format(self) -> &'static str {
        match self {
            FontFormat::Ttf => "truetype",
            FontFormat::Otf => "opentype",
            FontFormat::Woff => "woff",
            FontFormat::Woff2 => "woff2",
        }
    }

    /// Identify the container from its 4-byte signature.
    ///
    /// Only the signature is read; the tables behind it are opaque.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes.get(..4)? {
            b"wOFF" => Some(FontFormat::Woff),
            b"wOF2" => Some(FontFormat::Woff2),
            b"OTTO" => Some(FontFormat::Otf),
            b"true" => Some(FontFormat::Ttf),
            [0x00, 0x01, 0x00, 0x00] => Some(FontFormat::Ttf),
            _ => None,
        }
    }
}

impl fmt::Display for FontFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// What the font is used for on the worksheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageType {
    Pinyin,
    Character,
}

impl UsageType {
    pub fn as_str(self) -> &'static str {
        match self {
            UsageType::Pinyin => "pinyin",
            UsageType::Character => "character",
        }
    }

    /// System fonts placed after the custom family
    pub fn fallback_stack(self) -> &'static str {
        match self {
            UsageType::Character => CHARACTER_FALLBACK_STACK,
            UsageType::Pinyin => PINYIN_FALLBACK_STACK,
        }
    }

    pub fn optimized_class(self) -> &'static str {
        match self {
            UsageType::Character => "character-font-optimized",
            UsageType::Pinyin => "pinyin-font-optimized",
        }
    }

    pub fn target_selectors(self) -> &'static str {
        match self {
            UsageType::Character => ".apply-character-font, .character, .character-font",
            UsageType::Pinyin => ".apply-pinyin-font, .pinyin, .pinyin-font",
        }
    }
}

/// Where the binary came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    LocalFile,
    RemoteUrl,
}

/// Outcome of rendering verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Verification {
    /// Registered, not yet checked
    #[default]
    Unverified,
    /// The renderer draws with the custom face
    Active,
    /// Verification failed; fallback rules were injected and the record is best effort
    Failed,
}

/// Raw input for a font: bytes already in memory, or a URL to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySource {
    Bytes {
        bytes: Arc<[u8]>,
        file_name: Option<String>,
    },
    Url(String),
}

impl BinarySource {
    pub fn kind(&self) -> SourceKind {
        match self {
            BinarySource::Bytes { .. } => SourceKind::LocalFile,
            BinarySource::Url(_) => SourceKind::RemoteUrl,
        }
    }

    /// Short label for logs and errors
    pub fn describe(&self) -> String {
        match self {
            BinarySource::Bytes { file_name: Some(name), .. } => name.clone(),
            BinarySource::Bytes { bytes, .. } => format!("<{} bytes>", bytes.len()),
            BinarySource::Url(url) if url.starts_with("data:") => "<data URI>".to_string(),
            BinarySource::Url(url) => url.clone(),
        }
    }
}

/// A request to provision a font
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontDefinition {
    pub display_name: String,
    pub source: BinarySource,
    pub format: FontFormat,
    pub usage: UsageType,
    /// Explicit family to register under instead of a minted one
    pub family: Option<String>,
}

impl FontDefinition {
    pub fn from_bytes(
        display_name: &str,
        bytes: impl Into<Arc<[u8]>>,
        format: FontFormat,
        usage: UsageType,
    ) -> Self {
        Self {
            display_name: display_name.to_string(),
            source: BinarySource::Bytes { bytes: bytes.into(), file_name: None },
            format,
            usage,
            family: None,
        }
    }

    pub fn from_url(display_name: &str, url: &str, format: FontFormat, usage: UsageType) -> Self {
        Self {
            display_name: display_name.to_string(),
            source: BinarySource::Url(url.to_string()),
            format,
            usage,
            family: None,
        }
    }

    /// Build a definition for an uploaded file.
    ///
    /// The display name is the file name without its extension; a missing
    /// extension defaults to TTF.
    pub fn from_upload(
        file_name: &str,
        bytes: impl Into<Arc<[u8]>>,
        usage: UsageType,
    ) -> Result<Self, AcquireError> {
        let (stem, format) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let format = FontFormat::from_extension(ext).ok_or_else(|| {
                    AcquireError::UnsupportedFormat { extension: ext.to_string() }
                })?;
                (stem, format)
            }
            _ => (file_name, FontFormat::Ttf),
        };

        Ok(Self {
            display_name: stem.to_string(),
            source: BinarySource::Bytes {
                bytes: bytes.into(),
                file_name: Some(file_name.to_string()),
            },
            format,
            usage,
            family: None,
        })
    }

    pub fn with_family(mut self, family: &str) -> Self {
        self.family = Some(family.to_string());
        self
    }
}

/// One provisioned font
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRecord {
    pub family: String,
    pub display_name: String,
    pub source_kind: SourceKind,
    pub format: FontFormat,
    /// Self-contained `data:` URI for the binary
    pub encoded_payload: Arc<str>,
    pub usage: UsageType,
    pub verification: Verification,
    /// Second family name pointing at the same payload, set by the fallback forcer
    pub backup_family: Option<String>,
    pub byte_len: usize,
}

impl FontRecord {
    /// `"<family>", <usage stack>`
    pub fn font_stack(&self) -> String {
        format!("\"{}\", {}", self.family, self.usage.fallback_stack())
    }

    pub fn css_class(&self) -> String {
        css_class_name(&self.family)
    }

    pub fn is_loaded(&self) -> bool {
        self.verification != Verification::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tables() {
        assert_eq!(FontFormat::from_extension("WOFF2"), Some(FontFormat::Woff2));
        assert_eq!(FontFormat::from_extension("eot"), None);
        assert_eq!(FontFormat::Ttf.mime_type(), "font/ttf");
        assert_eq!(FontFormat::Otf.css_format(), "opentype");
    }

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(FontFormat::sniff(b"wOF2rest"), Some(FontFormat::Woff2));
        assert_eq!(FontFormat::sniff(b"OTTO"), Some(FontFormat::Otf));
        assert_eq!(FontFormat::sniff(&[0, 1, 0, 0, 9]), Some(FontFormat::Ttf));
        assert_eq!(FontFormat::sniff(b"abc"), None);
        assert_eq!(FontFormat::sniff(b"GIF8"), None);
    }

    #[test]
    fn test_upload_definition() {
        let def = FontDefinition::from_upload("楷体.woff", vec![1u8, 2, 3], UsageType::Character)
            .unwrap();
        assert_eq!(def.display_name, "楷体");
        assert_eq!(def.format, FontFormat::Woff);
        assert_eq!(def.source.kind(), SourceKind::LocalFile);

        let def = FontDefinition::from_upload("Handwriting", vec![1u8], UsageType::Pinyin).unwrap();
        assert_eq!(def.format, FontFormat::Ttf);
        assert_eq!(def.display_name, "Handwriting");

        let err = FontDefinition::from_upload("font.eot", vec![1u8], UsageType::Pinyin).unwrap_err();
        assert_eq!(err, AcquireError::UnsupportedFormat { extension: "eot".into() });
    }

    #[test]
    fn test_usage_stacks() {
        assert!(UsageType::Character.fallback_stack().ends_with("serif"));
        assert!(UsageType::Pinyin.fallback_stack().starts_with("Arial"));
        assert_eq!(UsageType::Pinyin.optimized_class(), "pinyin-font-optimized");
    }
}
