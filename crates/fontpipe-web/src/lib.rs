//! Fontpipe Web - browser backend for fontpipe-core
//!
//! Implements the core capability traits on top of `web-sys`: style and link
//! nodes in the document head, `document.fonts`, an iframe sandbox with canvas
//! rasterization, `setTimeout` timers and `fetch`. `FontPipe` exposes the
//! loader to JavaScript.

#[cfg(target_arch = "wasm32")]
mod event_loop;
#[cfg(target_arch = "wasm32")]
mod facade;
#[cfg(target_arch = "wasm32")]
mod surface;

#[cfg(target_arch = "wasm32")]
pub use event_loop::{WebEventLoop, WebFetcher};
#[cfg(target_arch = "wasm32")]
pub use facade::FontPipe;
#[cfg(target_arch = "wasm32")]
pub use surface::WebSurface;

// Re-export fontpipe-core types for convenience
pub use fontpipe_core::*;
