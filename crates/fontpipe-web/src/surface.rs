//! Document surface over the live browser DOM

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use js_sys::{Date, Object, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    CanvasRenderingContext2d, Document, Element, FontFace, FontFaceDescriptors, HtmlCanvasElement,
    HtmlElement, HtmlIFrameElement, Window,
};

use fontpipe_core::{
    DocumentSurface, FaceDescriptors, ProbeId, ProbeMetrics, ProbeSandbox, ProbeSpec, Raster,
    RasterSpec, StylePlacement, SurfaceError,
};

const HIDDEN_PROBE_STYLE: &str =
    "position:absolute;left:-9999px;top:-9999px;visibility:hidden;pointer-events:none;";
const SANDBOX_STYLE: &str = "position:absolute;left:-9999px;width:500px;height:200px;visibility:hidden;";
const SANDBOX_DOC: &str = "<!DOCTYPE html><html><head></head><body></body></html>";

fn js_err(context: &str, value: JsValue) -> SurfaceError {
    SurfaceError::Dom(format!("{context}: {}", value.as_string().unwrap_or_else(|| format!("{value:?}"))))
}

fn dom(window: &Window) -> Result<Document, SurfaceError> {
    window.document().ok_or_else(|| SurfaceError::Dom("window has no document".to_string()))
}

/// `DocumentSurface` for the page the module runs in
pub struct WebSurface {
    document: Document,
    /// Faces this surface added to `document.fonts`, by family
    faces: Rc<RefCell<HashMap<String, Vec<FontFace>>>>,
    next_element_id: Cell<u32>,
}

impl WebSurface {
    pub fn new() -> Result<Self, SurfaceError> {
        let window = web_sys::window().ok_or_else(|| SurfaceError::Dom("no global window".to_string()))?;
        let document = dom(&window)?;
        Ok(Self { document, faces: Rc::default(), next_element_id: Cell::new(0) })
    }

    fn head(&self) -> Result<Element, SurfaceError> {
        self.document
            .head()
            .map(Element::from)
            .ok_or_else(|| SurfaceError::Dom("document has no head".to_string()))
    }

    fn body(&self) -> Result<HtmlElement, SurfaceError> {
        self.document.body().ok_or_else(|| SurfaceError::Dom("document has no body".to_string()))
    }

    fn html_element(&self, id: &str) -> Option<HtmlElement> {
        self.document.get_element_by_id(id)?.dyn_into::<HtmlElement>().ok()
    }

    /// Text of every registered face rule fragment, for copying into the sandbox
    fn face_rule_text(&self) -> String {
        let Ok(nodes) = self.document.query_selector_all("style[id^=\"font-style-\"], style[id^=\"font-backup-\"]") else {
            return String::new();
        };
        (0..nodes.length())
            .filter_map(|i| nodes.get(i))
            .filter_map(|node| node.text_content())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn build_probe(&self, probe: &ProbeSpec) -> Result<Element, JsValue> {
        let container = self.document.create_element("div")?;
        container.set_id(&probe.id);
        container.set_attribute("style", HIDDEN_PROBE_STYLE)?;

        for line in &probe.lines {
            let el = self.document.create_element("div")?;
            el.set_text_content(Some(&line.text));
            let mut style = format!("font-size:{}px;", line.font_size_px);
            if let Some(stack) = &line.font_stack {
                style.push_str(&format!("font-family:{stack} !important;"));
            }
            el.set_attribute("style", &style)?;
            if let Some(class) = &line.class_name {
                el.set_class_name(class);
            }
            container.append_child(&el)?;
        }

        if let Some(css) = &probe.scoped_css {
            let style = self.document.create_element("style")?;
            style.set_text_content(Some(css));
            container.append_child(&style)?;
        }
        Ok(container)
    }
}

impl DocumentSurface for WebSurface {
    fn insert_style(&self, id: &str, css: &str, placement: StylePlacement) -> Result<(), SurfaceError> {
        let head = self.head()?;
        let style = self.document.create_element("style").map_err(|e| js_err("create style", e))?;
        style.set_id(id);
        style.set_text_content(Some(css));
        let inserted = match placement {
            StylePlacement::Prepend => head.prepend_with_node_1(&style),
            StylePlacement::Append => head.append_child(&style).map(|_| ()),
        };
        inserted.map_err(|e| js_err("insert style", e))
    }

    fn remove_node(&self, id: &str) -> bool {
        match self.document.get_element_by_id(id) {
            Some(el) => {
                el.remove();
                true
            }
            None => false,
        }
    }

    fn has_node(&self, id: &str) -> bool {
        self.document.get_element_by_id(id).is_some()
    }

    fn append_probe(&self, probe: &ProbeSpec) -> Result<(), SurfaceError> {
        let container = self.build_probe(probe).map_err(|e| js_err("build probe", e))?;
        self.body()?.append_child(&container).map_err(|e| js_err("append probe", e))?;
        Ok(())
    }

    fn append_preload(&self, id: &str, href: &str) -> Result<(), SurfaceError> {
        let link = self.document.create_element("link").map_err(|e| js_err("create link", e))?;
        link.set_id(id);
        for (name, value) in [("rel", "preload"), ("href", href), ("as", "font"), ("crossorigin", "anonymous")] {
            link.set_attribute(name, value).map_err(|e| js_err("link attribute", e))?;
        }
        self.head()?.append_child(&link).map_err(|e| js_err("append link", e))?;
        Ok(())
    }

    fn set_body_visible(&self, visible: bool) {
        let value = if visible { "visible" } else { "hidden" };
        match self.body() {
            Ok(body) => {
                if let Err(e) = body.style().set_property("visibility", value) {
                    tracing::warn!("failed to set body visibility: {:?}", e);
                }
            }
            Err(e) => tracing::warn!("{}", e),
        }
    }

    fn load_face(
        &self,
        family: &str,
        source: &str,
        descriptors: &FaceDescriptors,
    ) -> LocalBoxFuture<'static, Result<(), SurfaceError>> {
        let face_err = |e: JsValue| SurfaceError::FaceLoad {
            family: family.to_string(),
            message: e.as_string().unwrap_or_else(|| format!("{e:?}")),
        };

        let init = FontFaceDescriptors::new();
        init.set_display(descriptors.display);
        init.set_weight(descriptors.weight);
        init.set_style(descriptors.style);

        let face = match FontFace::new_with_str_and_descriptors(family, source, &init) {
            Ok(face) => face,
            Err(e) => {
                let err = face_err(e);
                return Box::pin(async move { Err(err) });
            }
        };
        let loading = face.load().map_err(face_err);

        let fonts = self.document.fonts();
        let family = family.to_string();
        self.faces.borrow_mut().entry(family.clone()).or_default().push(face.clone());
        let registry = Rc::clone(&self.faces);

        Box::pin(async move {
            let promise = loading?;
            JsFuture::from(promise).await.map_err(|e| SurfaceError::FaceLoad {
                family: family.clone(),
                message: e.as_string().unwrap_or_else(|| format!("{e:?}")),
            })?;
            // delete_faces ran while the face was loading
            let still_wanted = registry
                .borrow()
                .get(&family)
                .is_some_and(|faces| faces.iter().any(|f| Object::is(f, &face)));
            if !still_wanted {
                tracing::debug!("face for {} was deleted while loading, not adding it", family);
                return Ok(());
            }
            fonts.add(&face).map_err(|e| SurfaceError::FaceLoad {
                family: family.clone(),
                message: format!("{e:?}"),
            })?;
            Ok(())
        })
    }

    fn delete_faces(&self, family: &str) -> Result<usize, SurfaceError> {
        let faces = self.faces.borrow_mut().remove(family).unwrap_or_default();
        let fonts = self.document.fonts();
        for face in &faces {
            fonts.delete(face);
        }
        Ok(faces.len())
    }

    fn open_sandbox(&self) -> LocalBoxFuture<'static, Result<Box<dyn ProbeSandbox>, SurfaceError>> {
        let setup = (|| -> Result<(HtmlIFrameElement, Promise), SurfaceError> {
            let iframe: HtmlIFrameElement = self
                .document
                .create_element("iframe")
                .map_err(|e| js_err("create iframe", e))?
                .dyn_into()
                .map_err(|_| SurfaceError::Sandbox("iframe element has the wrong type".to_string()))?;
            iframe.set_attribute("style", SANDBOX_STYLE).map_err(|e| js_err("iframe style", e))?;

            let target = iframe.clone();
            let loaded = Promise::new(&mut |resolve, reject| {
                target.set_onload(Some(&resolve));
                target.set_onerror(Some(&reject));
            });
            iframe.set_srcdoc(SANDBOX_DOC);
            self.body()?.append_child(&iframe).map_err(|e| js_err("append iframe", e))?;
            Ok((iframe, loaded))
        })();
        let face_rules = self.face_rule_text();

        Box::pin(async move {
            let (iframe, loaded) = setup?;
            // Removes the iframe again if anything below fails
            let mut sandbox = IframeSandbox { iframe, document: None, window: None, probes: Vec::new() };
            JsFuture::from(loaded)
                .await
                .map_err(|e| SurfaceError::Sandbox(format!("iframe failed to load: {e:?}")))?;

            let document = sandbox
                .iframe
                .content_document()
                .ok_or_else(|| SurfaceError::Sandbox("iframe has no document".to_string()))?;
            let window = sandbox
                .iframe
                .content_window()
                .ok_or_else(|| SurfaceError::Sandbox("iframe has no window".to_string()))?;

            let style = document.create_element("style").map_err(|e| js_err("sandbox style", e))?;
            style.set_text_content(Some(&face_rules));
            if let Some(head) = document.head() {
                head.append_child(&style).map_err(|e| js_err("sandbox style", e))?;
            }

            sandbox.document = Some(document);
            sandbox.window = Some(window);
            Ok(Box::new(sandbox) as Box<dyn ProbeSandbox>)
        })
    }

    fn select_elements(&self, selectors: &str) -> Vec<String> {
        let nodes = match self.document.query_selector_all(selectors) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!("invalid selector {}: {:?}", selectors, e);
                return Vec::new();
            }
        };

        let mut ids = Vec::new();
        for i in 0..nodes.length() {
            let Some(el) = nodes.get(i).and_then(|n| n.dyn_into::<Element>().ok()) else {
                continue;
            };
            if el.id().is_empty() {
                let n = self.next_element_id.get();
                self.next_element_id.set(n + 1);
                el.set_id(&format!("el-{}-{}", Date::now() as u64, n));
            }
            ids.push(el.id());
        }
        ids
    }

    fn element_classes(&self, element: &str) -> Vec<String> {
        self.document
            .get_element_by_id(element)
            .map(|el| el.class_name().split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn add_class(&self, element: &str, class: &str) {
        if let Some(el) = self.document.get_element_by_id(element) {
            if let Err(e) = el.class_list().add_1(class) {
                tracing::warn!("failed to add class {} to {}: {:?}", class, element, e);
            }
        }
    }

    fn remove_class(&self, element: &str, class: &str) {
        if let Some(el) = self.document.get_element_by_id(element) {
            if let Err(e) = el.class_list().remove_1(class) {
                tracing::warn!("failed to remove class {} from {}: {:?}", class, element, e);
            }
        }
    }

    fn remove_inline_property(&self, element: &str, property: &str) {
        if let Some(el) = self.html_element(element) {
            let _ = el.style().remove_property(property);
        }
    }

    fn set_inline_property(&self, element: &str, property: &str, value: &str, important: bool) {
        if let Some(el) = self.html_element(element) {
            let priority = if important { "important" } else { "" };
            if let Err(e) = el.style().set_property_with_priority(property, value, priority) {
                tracing::warn!("failed to set {} on {}: {:?}", property, element, e);
            }
        }
    }

    fn set_data_attribute(&self, element: &str, key: &str, value: &str) {
        if let Some(el) = self.document.get_element_by_id(element) {
            let _ = el.set_attribute(&format!("data-{key}"), value);
        }
    }
}

/// Hidden iframe with its own document; removed from the page on drop
struct IframeSandbox {
    iframe: HtmlIFrameElement,
    document: Option<Document>,
    window: Option<Window>,
    probes: Vec<HtmlElement>,
}

impl IframeSandbox {
    fn document(&self) -> Result<&Document, SurfaceError> {
        self.document.as_ref().ok_or_else(|| SurfaceError::Sandbox("sandbox not loaded".to_string()))
    }

    fn context(&self, spec: &RasterSpec) -> Result<CanvasRenderingContext2d, SurfaceError> {
        let canvas: HtmlCanvasElement = self
            .document()?
            .create_element("canvas")
            .map_err(|e| js_err("create canvas", e))?
            .dyn_into()
            .map_err(|_| SurfaceError::Raster("canvas element has the wrong type".to_string()))?;
        canvas.set_width(spec.width);
        canvas.set_height(spec.height);
        canvas
            .get_context("2d")
            .map_err(|e| SurfaceError::Raster(format!("{e:?}")))?
            .ok_or_else(|| SurfaceError::Raster("2d context unavailable".to_string()))?
            .dyn_into()
            .map_err(|_| SurfaceError::Raster("unexpected context type".to_string()))
    }
}

impl ProbeSandbox for IframeSandbox {
    fn mount_probe(&mut self, text: &str, font_stack: &str, font_size_px: f64) -> Result<ProbeId, SurfaceError> {
        let document = self.document()?;
        let el: HtmlElement = document
            .create_element("div")
            .map_err(|e| js_err("create probe", e))?
            .dyn_into()
            .map_err(|_| SurfaceError::Sandbox("probe element has the wrong type".to_string()))?;
        el.set_text_content(Some(text));
        let style = format!(
            "position:absolute;white-space:nowrap;font-size:{font_size_px}px;font-family:{font_stack};"
        );
        el.set_attribute("style", &style).map_err(|e| js_err("probe style", e))?;
        document
            .body()
            .ok_or_else(|| SurfaceError::Sandbox("sandbox has no body".to_string()))?
            .append_child(&el)
            .map_err(|e| js_err("append probe", e))?;
        self.probes.push(el);
        Ok(ProbeId(self.probes.len() - 1))
    }

    fn probe_metrics(&self, probe: ProbeId) -> Result<ProbeMetrics, SurfaceError> {
        let el = self
            .probes
            .get(probe.0)
            .ok_or_else(|| SurfaceError::Sandbox(format!("no probe {}", probe.0)))?;
        let window = self.window.as_ref().ok_or_else(|| SurfaceError::Sandbox("sandbox not loaded".to_string()))?;
        let computed_family = window
            .get_computed_style(el)
            .map_err(|e| js_err("computed style", e))?
            .map(|style| style.get_property_value("font-family").unwrap_or_default())
            .unwrap_or_default();
        Ok(ProbeMetrics { width: el.offset_width() as f64, computed_family })
    }

    fn rasterize(&self, text: &str, font_stack: &str, spec: &RasterSpec) -> Result<Raster, SurfaceError> {
        let ctx = self.context(spec)?;
        // Opaque white page so the RGB comparison sees black ink
        #[allow(deprecated)]
        ctx.set_fill_style(&JsValue::from_str("#ffffff"));
        ctx.fill_rect(0.0, 0.0, spec.width as f64, spec.height as f64);
        #[allow(deprecated)]
        ctx.set_fill_style(&JsValue::from_str("#000000"));
        ctx.set_font(&format!("{}px {}", spec.font_size_px, font_stack));
        ctx.fill_text(text, spec.origin.0, spec.origin.1)
            .map_err(|e| SurfaceError::Raster(format!("{e:?}")))?;
        let data = ctx
            .get_image_data(0.0, 0.0, spec.width as f64, spec.height as f64)
            .map_err(|e| SurfaceError::Raster(format!("{e:?}")))?;
        Raster::from_rgba(spec.width, spec.height, data.data().0)
    }
}

impl Drop for IframeSandbox {
    fn drop(&mut self) {
        self.iframe.remove();
    }
}
