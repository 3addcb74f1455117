//! Fontpipe Core - platform-agnostic font provisioning pipeline
//!
//! Turns user-supplied font binaries into registered, verified font families
//! on a host document reached only through the capability traits, so the same
//! pipeline runs in a browser or against the dummy surface.

pub mod apply;
pub mod config;
pub mod constants;
pub mod dummy_surface;
pub mod error;
pub mod events;
pub mod font;
pub mod raster;
pub mod traits;

// Re-export main types
pub use apply::{AppliedStyles, FontApplier};
pub use config::PipelineConfig;
pub use error::{AcquireError, EncodeError, FontError, FontResult, SurfaceError};
pub use events::{EventBus, FontEvent};
pub use font::{
    BinarySource, FontDefinition, FontFormat, FontLoader, FontRecord, SourceKind, UsageType,
    Verification,
};
pub use raster::{count_differing_pixels, Raster, TextRasterizer};

// Re-export traits and types
pub use traits::*;
