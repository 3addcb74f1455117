// src/config.rs
use std::time::Duration;

use crate::constants::{
    COMPLETION_EVENT_DELAY_MS, ENCODE_CHUNK_SIZE, FAMILY_SLUG_MAX_GRAPHEMES,
    FORCER_PROBE_DELAY_MS, FORCER_PROBE_LIFETIME_MS, INFLIGHT_TIMEOUT_MS, PIXEL_DIFF_THRESHOLD,
    PROBE_FONT_SIZE_PX, RASTER_FONT_SIZE_PX, RASTER_HEIGHT, RASTER_ORIGIN, RASTER_WIDTH,
    REFLOW_HIDE_MS, VERIFY_SETTLE_MS, VERIFY_TIMEOUT_MS, WIDTH_DIFF_THRESHOLD_PX,
};

/// Timing table and thresholds for the whole pipeline.
///
/// Every delay the pipeline waits on is named here so it can be tuned per
/// host and shortened in tests.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    pub encode_chunk_size: usize,
    pub reflow_hide: Duration,
    pub completion_event_delay: Duration,
    pub verify_settle: Duration,
    pub verify_timeout: Duration,
    pub width_threshold_px: f64,
    pub pixel_threshold: usize,
    pub probe_font_size_px: f64,
    pub raster_width: u32,
    pub raster_height: u32,
    pub raster_font_size_px: f64,
    pub raster_origin: (f64, f64),
    pub forcer_probe_delay: Duration,
    pub forcer_probe_lifetime: Duration,
    pub inflight_timeout: Duration,
    /// Run the fallback forcer even when verification succeeds.
    pub proactive_fallback: bool,
    pub family_slug_max_graphemes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            encode_chunk_size: ENCODE_CHUNK_SIZE,
            reflow_hide: Duration::from_millis(REFLOW_HIDE_MS),
            completion_event_delay: Duration::from_millis(COMPLETION_EVENT_DELAY_MS),
            verify_settle: Duration::from_millis(VERIFY_SETTLE_MS),
            verify_timeout: Duration::from_millis(VERIFY_TIMEOUT_MS),
            width_threshold_px: WIDTH_DIFF_THRESHOLD_PX,
            pixel_threshold: PIXEL_DIFF_THRESHOLD,
            probe_font_size_px: PROBE_FONT_SIZE_PX,
            raster_width: RASTER_WIDTH,
            raster_height: RASTER_HEIGHT,
            raster_font_size_px: RASTER_FONT_SIZE_PX,
            raster_origin: RASTER_ORIGIN,
            forcer_probe_delay: Duration::from_millis(FORCER_PROBE_DELAY_MS),
            forcer_probe_lifetime: Duration::from_millis(FORCER_PROBE_LIFETIME_MS),
            inflight_timeout: Duration::from_millis(INFLIGHT_TIMEOUT_MS),
            proactive_fallback: false,
            family_slug_max_graphemes: FAMILY_SLUG_MAX_GRAPHEMES,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encode_chunk_size(mut self, size: usize) -> Self {
        self.encode_chunk_size = size.max(1);
        self
    }

    pub fn with_verify_settle(mut self, settle: Duration) -> Self {
        self.verify_settle = settle;
        self
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    pub fn with_inflight_timeout(mut self, timeout: Duration) -> Self {
        self.inflight_timeout = timeout;
        self
    }

    pub fn with_completion_event_delay(mut self, delay: Duration) -> Self {
        self.completion_event_delay = delay;
        self
    }

    pub fn with_thresholds(mut self, width_px: f64, pixels: usize) -> Self {
        self.width_threshold_px = width_px.max(0.0);
        self.pixel_threshold = pixels;
        self
    }

    pub fn with_proactive_fallback(mut self, enabled: bool) -> Self {
        self.proactive_fallback = enabled;
        self
    }

    /// Chunk size actually used by the encoder: a multiple of 3 so base64
    /// chunks concatenate without interior padding.
    pub fn effective_chunk_size(&self) -> usize {
        let size = self.encode_chunk_size.max(3);
        size - size % 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_timing_table() {
        let config = PipelineConfig::default();
        assert_eq!(config.verify_timeout, Duration::from_millis(2000));
        assert_eq!(config.verify_settle, Duration::from_millis(200));
        assert_eq!(config.inflight_timeout, Duration::from_millis(5000));
        assert_eq!(config.pixel_threshold, 100);
        assert!(!config.proactive_fallback);
    }

    #[test]
    fn test_effective_chunk_size_is_multiple_of_three() {
        assert_eq!(PipelineConfig::default().effective_chunk_size(), 1023);
        assert_eq!(PipelineConfig::new().with_encode_chunk_size(1).effective_chunk_size(), 3);
        assert_eq!(PipelineConfig::new().with_encode_chunk_size(3072).effective_chunk_size(), 3072);
    }
}
