//! RGBA text rasters for the pixel comparison signal

use fontdue::{Font, FontSettings};

use crate::error::SurfaceError;

/// RGBA8 pixel buffer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl Raster {
    /// Opaque white raster, the page background text is drawn onto
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            rgba: vec![255; width as usize * height as usize * 4],
        }
    }

    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, SurfaceError> {
        if rgba.len() != width as usize * height as usize * 4 {
            return Err(SurfaceError::Raster(format!(
                "buffer of {} bytes does not match {}x{}",
                rgba.len(),
                width,
                height
            )));
        }
        Ok(Self { width, height, rgba })
    }

    /// Composite black ink with the given coverage over one pixel
    fn cover(&mut self, x: i64, y: i64, coverage: u8) {
        if coverage == 0 || x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let ink = 255 - coverage;
        for channel in &mut self.rgba[idx..idx + 3] {
            *channel = (*channel).min(ink);
        }
        self.rgba[idx + 3] = 255;
    }
}

/// Count pixels whose RGB differs between two rasters.
///
/// Alpha is ignored. Rasters of different sizes are compared over their
/// overlap and every non-overlapping pixel counts as different.
pub fn count_differing_pixels(a: &Raster, b: &Raster) -> usize {
    let total_a = a.rgba.len() / 4;
    let total_b = b.rgba.len() / 4;

    if a.width != b.width || a.height != b.height {
        let w = a.width.min(b.width) as usize;
        let h = a.height.min(b.height) as usize;
        let mut differing = total_a.max(total_b) - w * h;
        for y in 0..h {
            for x in 0..w {
                let ia = (y * a.width as usize + x) * 4;
                let ib = (y * b.width as usize + x) * 4;
                if a.rgba[ia..ia + 3] != b.rgba[ib..ib + 3] {
                    differing += 1;
                }
            }
        }
        return differing;
    }

    a.rgba
        .chunks_exact(4)
        .zip(b.rgba.chunks_exact(4))
        .filter(|(pa, pb)| pa[..3] != pb[..3])
        .count()
}

fn is_wide(ch: char) -> bool {
    matches!(ch as u32,
        0x2E80..=0x2FDF |      // CJK radicals
        0x3000..=0x303F |      // CJK symbols and punctuation
        0x3400..=0x4DBF |      // Extension A
        0x4E00..=0x9FFF |      // Unified ideographs
        0xF900..=0xFAFF |      // Compatibility ideographs
        0xFF00..=0xFFEF |      // Fullwidth forms
        0x20000..=0x2A6DF      // Extension B
    )
}

/// Draws text either with a real outline font or with synthetic box glyphs.
///
/// The synthetic form stands in for system fonts that are not available
/// headlessly: each glyph is a filled box whose advance is a fixed fraction of
/// the em, doubled for ideographs.
pub enum TextRasterizer {
    Synthetic { advance_em: f64 },
    Outline(Box<Font>),
}

impl TextRasterizer {
    pub fn synthetic(advance_em: f64) -> Self {
        TextRasterizer::Synthetic { advance_em }
    }

    /// Parse font bytes with fontdue
    pub fn from_font_bytes(bytes: &[u8]) -> Result<Self, SurfaceError> {
        Font::from_bytes(bytes, FontSettings::default())
            .map(|font| TextRasterizer::Outline(Box::new(font)))
            .map_err(|e| SurfaceError::Raster(e.to_string()))
    }

    fn advance(&self, ch: char, size_px: f64) -> f64 {
        match self {
            TextRasterizer::Synthetic { advance_em } => {
                let em = if is_wide(ch) { *advance_em * 2.0 } else { *advance_em };
                em * size_px
            }
            TextRasterizer::Outline(font) => font.metrics(ch, size_px as f32).advance_width as f64,
        }
    }

    /// Advance width of a run of text
    pub fn measure(&self, text: &str, size_px: f64) -> f64 {
        text.chars().map(|ch| self.advance(ch, size_px)).sum()
    }

    /// Draw `text` with its baseline at `origin`
    pub fn draw(&self, text: &str, size_px: f64, origin: (f64, f64), raster: &mut Raster) {
        let (mut pen_x, baseline) = origin;
        for ch in text.chars() {
            match self {
                TextRasterizer::Synthetic { .. } => {
                    let advance = self.advance(ch, size_px);
                    if !ch.is_whitespace() {
                        let left = (pen_x + advance * 0.1).round() as i64;
                        let right = (pen_x + advance * 0.9).round() as i64;
                        let top = (baseline - size_px * 0.7).round() as i64;
                        for y in top..baseline.round() as i64 {
                            for x in left..right {
                                raster.cover(x, y, 255);
                            }
                        }
                    }
                    pen_x += advance;
                }
                TextRasterizer::Outline(font) => {
                    let (metrics, bitmap) = font.rasterize(ch, size_px as f32);
                    let left = pen_x.round() as i64 + metrics.xmin as i64;
                    let top = baseline.round() as i64 - metrics.height as i64 - metrics.ymin as i64;
                    for row in 0..metrics.height {
                        for col in 0..metrics.width {
                            let coverage = bitmap[row * metrics.width + col];
                            raster.cover(left + col as i64, top + row as i64, coverage);
                        }
                    }
                    pen_x += metrics.advance_width as f64;
                }
            }
        }
    }

    /// Fresh raster with `text` drawn on it
    pub fn render(&self, text: &str, size_px: f64, width: u32, height: u32, origin: (f64, f64)) -> Raster {
        let mut raster = Raster::new(width, height);
        self.draw(text, size_px, origin, &mut raster);
        raster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_rasters_do_not_differ() {
        let r = TextRasterizer::synthetic(0.5);
        let a = r.render("汉字测试", 30.0, 300, 100, (10.0, 50.0));
        let b = r.render("汉字测试", 30.0, 300, 100, (10.0, 50.0));
        assert_eq!(count_differing_pixels(&a, &b), 0);
        assert!(a.rgba.chunks_exact(4).any(|px| px[..3] == [0, 0, 0]), "ink expected");
        assert_eq!(&a.rgba[..4], &[255, 255, 255, 255], "background stays white");
    }

    #[test]
    fn test_different_advances_differ() {
        let base = TextRasterizer::synthetic(0.5).render("ABCabc", 30.0, 300, 100, (10.0, 50.0));
        let other = TextRasterizer::synthetic(0.62).render("ABCabc", 30.0, 300, 100, (10.0, 50.0));
        assert!(count_differing_pixels(&base, &other) > 100);
    }

    #[test]
    fn test_ideographs_differ_between_faces() {
        let base = TextRasterizer::synthetic(0.5).render("汉字测试", 30.0, 300, 100, (10.0, 50.0));
        let other = TextRasterizer::synthetic(0.62).render("汉字测试", 30.0, 300, 100, (10.0, 50.0));
        assert!(count_differing_pixels(&base, &other) > 100);
    }

    #[test]
    fn test_rgb_only_comparison() {
        let mut a = Raster::new(2, 1);
        let mut b = Raster::new(2, 1);
        a.rgba[3] = 255;
        b.rgba[3] = 10;
        assert_eq!(count_differing_pixels(&a, &b), 0);
        b.rgba[4] = 1;
        assert_eq!(count_differing_pixels(&a, &b), 1);
    }

    #[test]
    fn test_partial_coverage_is_grey() {
        let mut r = Raster::new(1, 1);
        r.cover(0, 0, 55);
        assert_eq!(r.rgba, vec![200, 200, 200, 255]);
        r.cover(0, 0, 5);
        assert_eq!(r.rgba, vec![200, 200, 200, 255], "lighter ink never brightens a pixel");
    }

    #[test]
    fn test_size_mismatch_counts_missing_pixels() {
        let a = Raster::new(4, 4);
        let b = Raster::new(2, 4);
        assert_eq!(count_differing_pixels(&a, &b), 8);
    }

    #[test]
    fn test_measure_wide_glyphs() {
        let r = TextRasterizer::synthetic(0.5);
        assert_eq!(r.measure("汉A", 10.0), 15.0);
    }

    #[test]
    fn test_from_rgba_validates_length() {
        assert!(Raster::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(Raster::from_rgba(2, 2, vec![0; 15]).is_err());
    }

    #[test]
    fn test_outline_font_if_available() {
        // Needs a system font; skipped quietly when none is installed
        let Ok(data) = std::fs::read("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf") else {
            eprintln!("DejaVuSans.ttf not found, skipping");
            return;
        };
        let outline = TextRasterizer::from_font_bytes(&data).unwrap();
        let synthetic = TextRasterizer::synthetic(0.5);
        let a = outline.render("ABCabc", 30.0, 300, 100, (10.0, 50.0));
        let b = synthetic.render("ABCabc", 30.0, 300, 100, (10.0, 50.0));
        assert!(count_differing_pixels(&a, &b) > 100);
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        assert!(TextRasterizer::from_font_bytes(b"not a font").is_err());
    }
}
