//! Applying a provisioned font to page elements

use std::cell::Cell;
use std::rc::Rc;

use crate::font::{FontRecord, UsageType};
use crate::traits::{DocumentSurface, StylePlacement};

pub fn global_style_id(family: &str) -> String {
    format!("font-global-{family}")
}

/// Classes left behind by an earlier font application
fn is_stale_font_class(class: &str) -> bool {
    let optimized = [UsageType::Character.optimized_class(), UsageType::Pinyin.optimized_class()];
    (class.contains("font_") || class.contains("custom_") || class.starts_with("font-") || class.ends_with("-font"))
        && !optimized.contains(&class)
}

/// What one application injected
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppliedStyles {
    pub elements: Vec<String>,
    /// Style node ids to remove when the font is released
    pub style_ids: Vec<String>,
}

/// Styles elements with a font record
pub struct FontApplier {
    surface: Rc<dyn DocumentSurface>,
    next_style: Cell<usize>,
}

impl FontApplier {
    pub fn new(surface: Rc<dyn DocumentSurface>) -> Self {
        Self { surface, next_style: Cell::new(0) }
    }

    /// Apply `record` to one element and return the id of its scoped style
    pub fn apply_to_element(&self, element: &str, record: &FontRecord) -> String {
        let surface = &self.surface;
        surface.remove_inline_property(element, "font-family");

        for class in surface.element_classes(element) {
            if is_stale_font_class(&class) {
                surface.remove_class(element, &class);
            }
        }
        surface.add_class(element, &record.css_class());
        surface.add_class(element, record.usage.optimized_class());

        let stack = record.font_stack();
        surface.set_inline_property(element, "font-family", &stack, true);
        surface.set_data_attribute(element, "font-family", &record.family);
        surface.set_data_attribute(element, "font-type", record.usage.as_str());

        let n = self.next_style.get();
        self.next_style.set(n + 1);
        let style_id = format!("font-apply-{}-{}", record.family, n);
        let css = format!("#{element} {{ font-family: {stack} !important; }}");
        if let Err(e) = surface.insert_style(&style_id, &css, StylePlacement::Append) {
            tracing::warn!("failed to add element style for {}: {}", element, e);
        }

        tracing::debug!("applied {} to element {}", record.family, element);
        style_id
    }

    /// Apply `record` to every element matching its usage selectors and add the
    /// global usage rules once
    pub fn apply_to_targets(&self, record: &FontRecord) -> AppliedStyles {
        let elements = self.surface.select_elements(record.usage.target_selectors());
        let mut style_ids: Vec<String> = elements
            .iter()
            .map(|element| self.apply_to_element(element, record))
            .collect();

        let global_id = global_style_id(&record.family);
        if !self.surface.has_node(&global_id) {
            let class = record.css_class();
            let usage = record.usage.as_str();
            let stack = record.font_stack();
            let css = format!(
                ".{class} {{ font-family: {stack} !important; }}\n\
                 .{usage} .{class}, .{usage}.{class}, .apply-{usage}-font .{class}, .apply-{usage}-font.{class} {{ font-family: {stack} !important; }}\n"
            );
            match self.surface.insert_style(&global_id, &css, StylePlacement::Append) {
                Ok(()) => style_ids.push(global_id),
                Err(e) => tracing::warn!("failed to add global rules for {}: {}", record.family, e),
            }
        }

        tracing::info!("applied {} to {} {} elements", record.family, elements.len(), record.usage.as_str());
        AppliedStyles { elements, style_ids }
    }
}
