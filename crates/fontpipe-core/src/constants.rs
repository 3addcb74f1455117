// src/constants.rs

// Encoding
pub const ENCODE_CHUNK_SIZE: usize = 1024;

// Registration timing
pub const REFLOW_HIDE_MS: u64 = 50;
pub const COMPLETION_EVENT_DELAY_MS: u64 = 500;

// Verification
pub const VERIFY_SETTLE_MS: u64 = 200;
pub const VERIFY_TIMEOUT_MS: u64 = 2000;
pub const WIDTH_DIFF_THRESHOLD_PX: f64 = 1.0;
pub const PIXEL_DIFF_THRESHOLD: usize = 100;
pub const PROBE_FONT_SIZE_PX: f64 = 50.0;
pub const RASTER_WIDTH: u32 = 300;
pub const RASTER_HEIGHT: u32 = 100;
pub const RASTER_FONT_SIZE_PX: f64 = 30.0;
pub const RASTER_ORIGIN: (f64, f64) = (10.0, 50.0);

// Fallback forcing
pub const FORCER_PROBE_DELAY_MS: u64 = 100;
pub const FORCER_PROBE_LIFETIME_MS: u64 = 3000;

// Load cache
pub const INFLIGHT_TIMEOUT_MS: u64 = 5000;

// Family naming
pub const FAMILY_PREFIX: &str = "custom_";
pub const FAMILY_SLUG_MAX_GRAPHEMES: usize = 32;
pub const BACKUP_SUFFIX: &str = "_backup";

// Probe strings
pub const REGISTRATION_PROBE_TEXT: &str = "字体加载测试ABCabc123天地玄黄宇宙洪荒";
pub const REGISTRATION_PROBE_SIZE_PX: f64 = 48.0;
pub const VERIFY_PROBE_TEXT: &str = "汉字测试123ABCabc";
pub const RASTER_PROBE_TEXT: &str = "汉字测试";
pub const FORCER_PROBE_TEXT: &str = "汉字测试ABCabc";
pub const FORCER_CLASS_PROBE_TEXT: &str = "类名测试";

// Fallback stacks per usage
pub const CHARACTER_FALLBACK_STACK: &str = "KaiTi, SimSun, serif";
pub const PINYIN_FALLBACK_STACK: &str = "Arial, \"Microsoft YaHei\", sans-serif";
pub const BASELINE_STACK: &str = "serif";
