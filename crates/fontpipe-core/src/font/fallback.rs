//! Forced fallback for faces that failed verification
//!
//! Re-declares the face under several names, preloads the payload and keeps a
//! short-lived probe on the page so the renderer has every reason to pick the
//! face up late.

use std::rc::Rc;

use crate::config::PipelineConfig;
use crate::constants::{FORCER_CLASS_PROBE_TEXT, FORCER_PROBE_TEXT, REGISTRATION_PROBE_SIZE_PX};
use crate::font::naming::{backup_family_name, css_class_name, safe_quote};
use crate::font::{FontFormat, Liveness};
use crate::traits::{DocumentSurface, EventLoop, FaceDescriptors, ProbeLine, ProbeSpec, StylePlacement};

pub fn backup_style_id(family: &str) -> String {
    format!("font-backup-{family}")
}

pub fn preload_id(family: &str) -> String {
    format!("font-preload-{family}")
}

pub fn force_probe_id(family: &str) -> String {
    format!("font-force-{family}")
}

/// Result of forcing a family
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForcedFallback {
    pub backup_family: String,
}

fn face_rule(family_token: &str, payload: &str, format: FontFormat) -> String {
    format!(
        "@font-face {{\n  font-family: {family_token};\n  src: url(\"{payload}\") format(\"{}\");\n  font-display: block;\n}}\n",
        format.css_format()
    )
}

/// Style fragment for the forced fallback: three faces plus applied-class and
/// inline-style attribute hooks
pub fn backup_rules_css(family: &str, backup: &str, payload: &str, format: FontFormat) -> String {
    let safe = safe_quote(family);
    let class = css_class_name(family);
    let mut css = String::new();
    css.push_str(&face_rule(&safe, payload, format));
    css.push_str(&face_rule(&format!("\"{family}\""), payload, format));
    css.push_str(&face_rule(&safe_quote(backup), payload, format));
    css.push_str(&format!(
        ".{class}-applied {{\n  font-family: {safe}, {backup_safe}, sans-serif !important;\n}}\n",
        backup_safe = safe_quote(backup)
    ));
    css.push_str(&format!(
        "[style*=\"font-family: {family}\"], [style*='font-family: \"{family}\"'] {{\n  font-family: {safe}, {backup_safe}, sans-serif !important;\n}}\n",
        backup_safe = safe_quote(backup)
    ));
    css
}

pub struct FallbackForcer {
    surface: Rc<dyn DocumentSurface>,
    event_loop: Rc<dyn EventLoop>,
    config: PipelineConfig,
}

impl FallbackForcer {
    pub fn new(surface: Rc<dyn DocumentSurface>, event_loop: Rc<dyn EventLoop>, config: PipelineConfig) -> Self {
        Self { surface, event_loop, config }
    }

    /// Force `family` onto the page. Does not re-verify; every failure is logged.
    ///
    /// The delayed force probe is skipped if `live` reports the family gone.
    pub fn force_apply(&self, family: &str, payload: &str, format: FontFormat, live: Liveness) -> ForcedFallback {
        let backup = backup_family_name(family);
        tracing::info!("forcing fallback application of {} (backup {})", family, backup);

        let style_id = backup_style_id(family);
        self.surface.remove_node(&style_id);
        let css = backup_rules_css(family, &backup, payload, format);
        if let Err(e) = self.surface.insert_style(&style_id, &css, StylePlacement::Append) {
            tracing::warn!("failed to inject backup rules for {}: {}", family, e);
        }

        let source = format!("url(\"{payload}\")");
        for name in [family.to_string(), backup.clone()] {
            let load = self.surface.load_face(&name, &source, &FaceDescriptors::default());
            self.event_loop.spawn(Box::pin(async move {
                if let Err(e) = load.await {
                    tracing::warn!("forced face load for {} failed: {}", name, e);
                }
            }));
        }

        let preload = preload_id(family);
        self.surface.remove_node(&preload);
        if let Err(e) = self.surface.append_preload(&preload, payload) {
            tracing::warn!("failed to add preload link for {}: {}", family, e);
        }

        self.schedule_probe(family, &backup, live);

        ForcedFallback { backup_family: backup }
    }

    fn schedule_probe(&self, family: &str, backup: &str, live: Liveness) {
        let id = force_probe_id(family);
        let line = |text: &str, font_stack: Option<String>, class_name: Option<String>| ProbeLine {
            text: text.to_string(),
            font_stack,
            class_name,
            font_size_px: REGISTRATION_PROBE_SIZE_PX,
        };
        let probe = ProbeSpec {
            id: id.clone(),
            lines: vec![
                line(FORCER_PROBE_TEXT, Some(safe_quote(family)), None),
                line(FORCER_PROBE_TEXT, Some(safe_quote(backup)), None),
                line(FORCER_CLASS_PROBE_TEXT, None, Some(format!("{}-applied", css_class_name(family)))),
            ],
            scoped_css: None,
        };

        let surface = Rc::clone(&self.surface);
        let delay = self.event_loop.sleep(self.config.forcer_probe_delay);
        let event_loop = Rc::clone(&self.event_loop);
        let lifetime = self.config.forcer_probe_lifetime;
        self.event_loop.spawn(Box::pin(async move {
            delay.await;
            if !live() {
                tracing::debug!("not adding {}, its family was released", probe.id);
                return;
            }
            surface.remove_node(&probe.id);
            if let Err(e) = surface.append_probe(&probe) {
                tracing::warn!("failed to append forcer probe {}: {}", probe.id, e);
                return;
            }
            event_loop.sleep(lifetime).await;
            surface.remove_node(&id);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy_surface::{DummySurface, ManualEventLoop};
    use std::cell::Cell;
    use std::time::Duration;

    const PAYLOAD: &str = "data:font/woff2;base64,d09GMg==";

    fn forcer(surface: &Rc<DummySurface>, event_loop: &Rc<ManualEventLoop>) -> FallbackForcer {
        FallbackForcer::new(surface.clone(), event_loop.clone(), PipelineConfig::default())
    }

    #[test]
    fn test_backup_rules_cover_three_faces() {
        let css = backup_rules_css("custom_Kai_1", "custom_Kai_1_backup", PAYLOAD, FontFormat::Woff2);
        assert_eq!(css.matches("@font-face").count(), 3);
        assert!(css.contains("font-family: custom_Kai_1_backup;"));
        assert!(css.contains(".custom_Kai_1-applied {"));
        assert!(css.contains("[style*=\"font-family: custom_Kai_1\"]"));
        assert!(css.contains("format(\"woff2\")"));
    }

    #[test]
    fn test_force_apply_injects_and_loads() {
        let surface = Rc::new(DummySurface::new());
        let event_loop = Rc::new(ManualEventLoop::new());
        let forced = forcer(&surface, &event_loop).force_apply("custom_Kai_1", PAYLOAD, FontFormat::Woff2, Rc::new(|| true));

        assert_eq!(forced.backup_family, "custom_Kai_1_backup");
        assert!(surface.has_node("font-backup-custom_Kai_1"));
        assert!(surface.has_node("font-preload-custom_Kai_1"));
        assert!(!surface.has_node("font-force-custom_Kai_1"));

        event_loop.run_for(Duration::from_millis(100));
        assert_eq!(surface.face_count("custom_Kai_1"), 1);
        assert_eq!(surface.face_count("custom_Kai_1_backup"), 1);
        assert!(surface.has_node("font-force-custom_Kai_1"));

        event_loop.run_until_idle();
        assert!(!surface.has_node("font-force-custom_Kai_1"));
        assert_eq!(event_loop.elapsed(), Duration::from_millis(3100));
    }

    #[test]
    fn test_repeated_force_replaces_fragments() {
        let surface = Rc::new(DummySurface::new());
        let event_loop = Rc::new(ManualEventLoop::new());
        let forcer = forcer(&surface, &event_loop);
        forcer.force_apply("custom_Kai_1", PAYLOAD, FontFormat::Woff2, Rc::new(|| true));
        forcer.force_apply("custom_Kai_1", PAYLOAD, FontFormat::Woff2, Rc::new(|| true));

        assert_eq!(surface.nodes_with_id("font-backup-custom_Kai_1"), 1);
        assert_eq!(surface.nodes_with_id("font-preload-custom_Kai_1"), 1);
        event_loop.run_for(Duration::from_millis(150));
        assert_eq!(surface.nodes_with_id("font-force-custom_Kai_1"), 1);
    }

    #[test]
    fn test_failed_loads_are_swallowed() {
        let surface = Rc::new(DummySurface::new().with_failing_face_loads());
        let event_loop = Rc::new(ManualEventLoop::new());
        let forced = forcer(&surface, &event_loop).force_apply("custom_Kai_1", PAYLOAD, FontFormat::Woff2, Rc::new(|| true));
        event_loop.run_until_idle();
        assert_eq!(forced.backup_family, "custom_Kai_1_backup");
        assert_eq!(surface.total_faces(), 0);
    }

    #[test]
    fn test_released_family_gets_no_force_probe() {
        let surface = Rc::new(DummySurface::new());
        let event_loop = Rc::new(ManualEventLoop::new());
        let released = Rc::new(Cell::new(false));
        let flag = released.clone();
        forcer(&surface, &event_loop).force_apply(
            "custom_Kai_1",
            PAYLOAD,
            FontFormat::Woff2,
            Rc::new(move || !flag.get()),
        );

        released.set(true);
        event_loop.run_until_idle();
        assert!(!surface.has_node("font-force-custom_Kai_1"));
        assert_eq!(event_loop.elapsed(), Duration::from_millis(100));
    }
}
