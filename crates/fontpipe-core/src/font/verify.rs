//! Rendering verification in an isolated sandbox
//!
//! A registered face is "active" when text set in it renders differently from
//! the same text set in the baseline serif. Three independent signals are
//! collected and any one of them is enough.

use std::rc::Rc;

use futures::future::{self, Either};

use crate::config::PipelineConfig;
use crate::constants::{BASELINE_STACK, RASTER_PROBE_TEXT, VERIFY_PROBE_TEXT};
use crate::error::SurfaceError;
use crate::font::naming::safe_quote;
use crate::raster::count_differing_pixels;
use crate::traits::{DocumentSurface, EventLoop, RasterSpec};

/// Raw verification signals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Signals {
    /// Rendered widths differ by more than the width threshold
    pub geometry: bool,
    /// The style engine reports different resolved families
    pub computed_style: bool,
    /// Rasterized text differs in more than the pixel threshold
    pub raster: bool,
}

impl Signals {
    /// Logical OR of the three signals.
    ///
    /// The computed-style signal alone can report success when the face never
    /// actually rendered.
    pub fn is_active(&self) -> bool {
        self.geometry || self.computed_style || self.raster
    }
}

pub struct Verifier {
    surface: Rc<dyn DocumentSurface>,
    event_loop: Rc<dyn EventLoop>,
    config: PipelineConfig,
}

impl Verifier {
    pub fn new(surface: Rc<dyn DocumentSurface>, event_loop: Rc<dyn EventLoop>, config: PipelineConfig) -> Self {
        Self { surface, event_loop, config }
    }

    /// Check whether `family` actually renders.
    ///
    /// Never fails: sandbox errors and the overall timeout both mean `false`.
    /// The sandbox is released on every path.
    pub async fn verify(&self, family: &str) -> bool {
        let probe = Box::pin(self.collect_signals(family));
        let timeout = self.event_loop.sleep(self.config.verify_timeout);

        match future::select(probe, timeout).await {
            Either::Left((Ok(signals), _)) => {
                let active = signals.is_active();
                tracing::info!(
                    "verification of {}: geometry={} computed_style={} raster={} -> {}",
                    family,
                    signals.geometry,
                    signals.computed_style,
                    signals.raster,
                    if active { "active" } else { "inactive" }
                );
                active
            }
            Either::Left((Err(e), _)) => {
                tracing::warn!("verification of {} failed: {}", family, e);
                false
            }
            Either::Right(((), _)) => {
                tracing::warn!(
                    "verification of {} timed out after {:?}",
                    family,
                    self.config.verify_timeout
                );
                false
            }
        }
    }

    async fn collect_signals(&self, family: &str) -> Result<Signals, SurfaceError> {
        let mut sandbox = self.surface.open_sandbox().await?;

        let candidate_stack = format!("{}, {}", safe_quote(family), BASELINE_STACK);
        let size = self.config.probe_font_size_px;
        let baseline = sandbox.mount_probe(VERIFY_PROBE_TEXT, BASELINE_STACK, size)?;
        let candidate = sandbox.mount_probe(VERIFY_PROBE_TEXT, &candidate_stack, size)?;

        self.event_loop.sleep(self.config.verify_settle).await;

        let baseline = sandbox.probe_metrics(baseline)?;
        let candidate = sandbox.probe_metrics(candidate)?;
        tracing::debug!(
            "{} widths: baseline={} candidate={}; families: {:?} vs {:?}",
            family,
            baseline.width,
            candidate.width,
            baseline.computed_family,
            candidate.computed_family
        );

        let spec = RasterSpec {
            width: self.config.raster_width,
            height: self.config.raster_height,
            font_size_px: self.config.raster_font_size_px,
            origin: self.config.raster_origin,
        };
        let raster = match (
            sandbox.rasterize(RASTER_PROBE_TEXT, BASELINE_STACK, &spec),
            sandbox.rasterize(RASTER_PROBE_TEXT, &candidate_stack, &spec),
        ) {
            (Ok(a), Ok(b)) => {
                let differing = count_differing_pixels(&a, &b);
                tracing::debug!("{} raster differs in {} pixels", family, differing);
                differing > self.config.pixel_threshold
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::debug!("raster signal unavailable for {}: {}", family, e);
                false
            }
        };

        Ok(Signals {
            geometry: (candidate.width - baseline.width).abs() > self.config.width_threshold_px,
            computed_style: candidate.computed_family != baseline.computed_family,
            raster,
        })
    }
}
