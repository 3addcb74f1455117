//! Capabilities the pipeline needs from its host document.
//!
//! The pipeline never touches global state directly: style sheets, the font
//! registry, timers and the network all come in through these traits so the
//! same code runs against a browser document or the recording dummy surface.

use std::time::Duration;

use futures::future::LocalBoxFuture;

use crate::error::{AcquireError, SurfaceError};
use crate::raster::Raster;

/// Where a style fragment goes in the document head
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StylePlacement {
    /// First child of head, so later page rules still win on specificity ties
    Prepend,
    Append,
}

/// Descriptors handed to the platform font-face constructor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceDescriptors {
    pub display: &'static str,
    pub weight: &'static str,
    pub style: &'static str,
}

impl Default for FaceDescriptors {
    fn default() -> Self {
        Self { display: "block", weight: "normal", style: "normal" }
    }
}

/// One line of text in a hidden probe element
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeLine {
    pub text: String,
    /// Inline font-family value, if any
    pub font_stack: Option<String>,
    pub class_name: Option<String>,
    pub font_size_px: f64,
}

/// Hidden, off-screen element used only to make the renderer resolve a face
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeSpec {
    pub id: String,
    pub lines: Vec<ProbeLine>,
    /// Style rules appended inside the probe element
    pub scoped_css: Option<String>,
}

/// Layout result read back from a sandbox probe
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeMetrics {
    pub width: f64,
    /// Resolved `font-family` as reported by the style engine
    pub computed_family: String,
}

/// Offscreen text raster request
#[derive(Clone, Debug, PartialEq)]
pub struct RasterSpec {
    pub width: u32,
    pub height: u32,
    pub font_size_px: f64,
    pub origin: (f64, f64),
}

/// Handle to a probe mounted in a sandbox
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProbeId(pub usize);

/// Isolated document used for verification.
///
/// Implementations tear everything down when dropped, so every exit path of
/// the verifier (success, error, timeout) releases the sandbox.
pub trait ProbeSandbox {
    fn mount_probe(&mut self, text: &str, font_stack: &str, font_size_px: f64) -> Result<ProbeId, SurfaceError>;
    fn probe_metrics(&self, probe: ProbeId) -> Result<ProbeMetrics, SurfaceError>;
    fn rasterize(&self, text: &str, font_stack: &str, spec: &RasterSpec) -> Result<Raster, SurfaceError>;
}

/// Document-wide font and style registry
pub trait DocumentSurface {
    fn insert_style(&self, id: &str, css: &str, placement: StylePlacement) -> Result<(), SurfaceError>;
    /// Remove the node with this id; `true` if one existed
    fn remove_node(&self, id: &str) -> bool;
    fn has_node(&self, id: &str) -> bool;
    fn append_probe(&self, probe: &ProbeSpec) -> Result<(), SurfaceError>;
    fn append_preload(&self, id: &str, href: &str) -> Result<(), SurfaceError>;
    fn set_body_visible(&self, visible: bool);

    /// Construct, load and register a face with the platform font registry
    fn load_face(
        &self,
        family: &str,
        source: &str,
        descriptors: &FaceDescriptors,
    ) -> LocalBoxFuture<'static, Result<(), SurfaceError>>;
    /// Unregister every face for `family`; returns how many were removed
    fn delete_faces(&self, family: &str) -> Result<usize, SurfaceError>;

    fn open_sandbox(&self) -> LocalBoxFuture<'static, Result<Box<dyn ProbeSandbox>, SurfaceError>>;

    // Element styling for the application layer. Elements are addressed by id;
    // `select_elements` assigns ids to matches that have none.
    fn select_elements(&self, selectors: &str) -> Vec<String>;
    fn element_classes(&self, element: &str) -> Vec<String>;
    fn add_class(&self, element: &str, class: &str);
    fn remove_class(&self, element: &str, class: &str);
    fn remove_inline_property(&self, element: &str, property: &str);
    fn set_inline_property(&self, element: &str, property: &str, value: &str, important: bool);
    fn set_data_attribute(&self, element: &str, key: &str, value: &str);
}

/// Timers and task spawning on the document's event loop
pub trait EventLoop {
    /// Wall-clock milliseconds, used for minting families
    fn now_millis(&self) -> u64;
    fn sleep(&self, delay: Duration) -> LocalBoxFuture<'static, ()>;
    /// Run a detached task to completion
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Remote binary acquisition
pub trait Fetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, AcquireError>>;
}

/// Fetcher for hosts without network access
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFetcher;

impl Fetcher for NoFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, AcquireError>> {
        let err = AcquireError::Network { message: format!("no fetcher available for {url}") };
        Box::pin(async move { Err(err) })
    }
}
