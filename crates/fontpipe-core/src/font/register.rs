//! Face-rule injection and platform registration

use std::rc::Rc;

use crate::config::PipelineConfig;
use crate::constants::{REGISTRATION_PROBE_SIZE_PX, REGISTRATION_PROBE_TEXT};
use crate::events::{EventBus, FontEvent};
use crate::font::naming::safe_quote;
use crate::font::{FontRecord, Liveness};
use crate::traits::{DocumentSurface, EventLoop, FaceDescriptors, ProbeLine, ProbeSpec, StylePlacement};

pub fn style_id(family: &str) -> String {
    format!("font-style-{family}")
}

pub fn probe_id(family: &str) -> String {
    format!("font-probe-{family}")
}

/// Style fragment with a primary and a duplicate face rule plus the usage class.
///
/// Two rules for the same family: some engines skip a single rule inserted
/// after first paint but pick up the second.
pub fn face_rules_css(record: &FontRecord) -> String {
    let format = record.format.css_format();
    let payload = &record.encoded_payload;
    format!(
        r#"
@font-face {{
  font-family: "{family}";
  src: url("{payload}") format("{format}");
  font-weight: normal;
  font-style: normal;
  font-display: block;
}}

@font-face {{
  font-family: {safe};
  src: url("{payload}") format("{format}");
  font-weight: normal;
  font-style: normal;
  font-display: block;
}}

.{class} {{
  font-family: "{family}", {stack} !important;
  -webkit-font-smoothing: antialiased;
  -moz-osx-font-smoothing: grayscale;
  text-rendering: optimizeLegibility;
}}
"#,
        family = record.family,
        safe = safe_quote(&record.family),
        class = record.css_class(),
        stack = record.usage.fallback_stack(),
    )
}

/// Injects face rules, loads the face through the platform and nudges the renderer
pub struct Registrar {
    surface: Rc<dyn DocumentSurface>,
    event_loop: Rc<dyn EventLoop>,
    events: Rc<EventBus>,
    config: PipelineConfig,
}

impl Registrar {
    pub fn new(
        surface: Rc<dyn DocumentSurface>,
        event_loop: Rc<dyn EventLoop>,
        events: Rc<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        Self { surface, event_loop, events, config }
    }

    /// Register `record` with the document.
    ///
    /// Returns `false` when the platform load primitive rejected the face; the
    /// CSS rules are still in place in that case and may yet take effect.
    /// Nothing past the face load runs once `live` reports the family gone.
    pub async fn register(&self, record: &FontRecord, live: Liveness) -> bool {
        let family = &record.family;
        tracing::info!("registering font {} ({})", family, record.display_name);

        let style_id = style_id(family);
        if self.surface.remove_node(&style_id) {
            tracing::debug!("replaced existing face rules for {}", family);
        }
        if let Err(e) = self.surface.insert_style(&style_id, &face_rules_css(record), StylePlacement::Prepend) {
            tracing::warn!("failed to inject face rules for {}: {}", family, e);
        }

        let source = format!("url(\"{}\")", record.encoded_payload);
        let loaded = match self.surface.load_face(family, &source, &FaceDescriptors::default()).await {
            Ok(()) => {
                tracing::debug!("platform face load succeeded for {}", family);
                true
            }
            Err(e) => {
                tracing::warn!("platform face load failed for {}, relying on CSS rules: {}", family, e);
                false
            }
        };

        if !live() {
            tracing::debug!("{} was released during its face load, skipping probe and event", family);
            return loaded;
        }

        self.append_probe(record);
        self.force_reflow();
        self.schedule_completion(record.clone(), live);

        loaded
    }

    fn append_probe(&self, record: &FontRecord) {
        let id = probe_id(&record.family);
        self.surface.remove_node(&id);

        let stack = format!("\"{}\", sans-serif", record.family);
        let probe = ProbeSpec {
            id: id.clone(),
            lines: vec![ProbeLine {
                text: REGISTRATION_PROBE_TEXT.to_string(),
                font_stack: Some(stack.clone()),
                class_name: None,
                font_size_px: REGISTRATION_PROBE_SIZE_PX,
            }],
            scoped_css: Some(format!("#{id} {{ font-family: {stack} !important; }}")),
        };
        if let Err(e) = self.surface.append_probe(&probe) {
            tracing::warn!("failed to append registration probe for {}: {}", record.family, e);
        }
    }

    /// Hide the body and show it again after the reflow window
    fn force_reflow(&self) {
        self.surface.set_body_visible(false);
        let surface = Rc::clone(&self.surface);
        let delay = self.event_loop.sleep(self.config.reflow_hide);
        self.event_loop.spawn(Box::pin(async move {
            delay.await;
            surface.set_body_visible(true);
        }));
    }

    fn schedule_completion(&self, record: FontRecord, live: Liveness) {
        let events = Rc::clone(&self.events);
        let delay = self.event_loop.sleep(self.config.completion_event_delay);
        self.event_loop.spawn(Box::pin(async move {
            delay.await;
            if !live() {
                tracing::debug!("{} was released, dropping its loaded event", record.family);
                return;
            }
            tracing::debug!("font loaded event for {}", record.family);
            events.publish(FontEvent::Loaded(record));
        }));
    }
}
