//! JavaScript entry point

use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use fontpipe_core::{
    FontDefinition, FontError, FontEvent, FontLoader, FontRecord, PipelineConfig, UsageType,
    Verification,
};

use crate::event_loop::{WebEventLoop, WebFetcher};
use crate::surface::WebSurface;

fn usage_from_js(usage: &str) -> Result<UsageType, JsValue> {
    match usage {
        "pinyin" => Ok(UsageType::Pinyin),
        "character" => Ok(UsageType::Character),
        other => Err(js_sys::Error::new(&format!("unknown font usage: {other}")).into()),
    }
}

fn to_js_error(e: FontError) -> JsValue {
    js_sys::Error::new(&e.to_string()).into()
}

fn verification_str(verification: Verification) -> &'static str {
    match verification {
        Verification::Unverified => "unverified",
        Verification::Active => "active",
        Verification::Failed => "failed",
    }
}

fn set(obj: &Object, key: &str, value: JsValue) {
    let _ = Reflect::set(obj, &JsValue::from_str(key), &value);
}

fn record_to_js(record: &FontRecord) -> JsValue {
    let obj = Object::new();
    set(&obj, "family", record.family.as_str().into());
    set(&obj, "displayName", record.display_name.as_str().into());
    set(&obj, "format", record.format.extension().into());
    set(&obj, "usage", record.usage.as_str().into());
    set(&obj, "verification", verification_str(record.verification).into());
    set(&obj, "loaded", record.is_loaded().into());
    set(&obj, "byteLength", (record.byte_len as f64).into());
    set(&obj, "url", (&*record.encoded_payload).into());
    set(
        &obj,
        "backupFamily",
        record.backup_family.as_deref().map_or(JsValue::NULL, JsValue::from_str),
    );
    obj.into()
}

fn event_to_js(event: &FontEvent) -> JsValue {
    let obj = Object::new();
    match event {
        FontEvent::Loaded(record) => {
            set(&obj, "type", "loaded".into());
            set(&obj, "font", record_to_js(record));
        }
        FontEvent::Verified { family, verification } => {
            set(&obj, "type", "verified".into());
            set(&obj, "family", family.as_str().into());
            set(&obj, "verification", verification_str(*verification).into());
        }
        FontEvent::Released { family } => {
            set(&obj, "type", "released".into());
            set(&obj, "family", family.as_str().into());
        }
    }
    obj.into()
}

/// Font loader bound to the current page
#[wasm_bindgen]
pub struct FontPipe {
    loader: FontLoader,
}

#[wasm_bindgen]
impl FontPipe {
    #[wasm_bindgen(constructor)]
    pub fn new(proactive_fallback: Option<bool>) -> Result<FontPipe, JsValue> {
        let surface = WebSurface::new().map_err(|e| js_sys::Error::new(&e.to_string()))?;
        let config = PipelineConfig::default().with_proactive_fallback(proactive_fallback.unwrap_or(false));
        let loader = FontLoader::new(Rc::new(surface), Rc::new(WebEventLoop), Rc::new(WebFetcher), config);
        Ok(FontPipe { loader })
    }

    /// Provision an uploaded file; resolves to the font record
    #[wasm_bindgen(js_name = acquireBytes)]
    pub fn acquire_bytes(&self, file_name: &str, bytes: Vec<u8>, usage: &str) -> Result<js_sys::Promise, JsValue> {
        let usage = usage_from_js(usage)?;
        let definition = FontDefinition::from_upload(file_name, bytes, usage)
            .map_err(|e| js_sys::Error::new(&e.to_string()))?;
        Ok(self.acquire(definition))
    }

    /// Provision a font from a URL; the format follows the URL's extension
    #[wasm_bindgen(js_name = acquireUrl)]
    pub fn acquire_url(&self, display_name: &str, url: &str, usage: &str) -> Result<js_sys::Promise, JsValue> {
        let usage = usage_from_js(usage)?;
        let format = fontpipe_core::font::format_from_path(url).unwrap_or(fontpipe_core::FontFormat::Ttf);
        Ok(self.acquire(FontDefinition::from_url(display_name, url, format, usage)))
    }

    fn acquire(&self, definition: FontDefinition) -> js_sys::Promise {
        let loader = self.loader.clone();
        future_to_promise(async move {
            loader
                .acquire(definition)
                .await
                .map(|record| record_to_js(&record))
                .map_err(to_js_error)
        })
    }

    pub fn release(&self, family: &str) -> bool {
        self.loader.release(family)
    }

    /// Resolves to `"active"` or `"failed"`
    pub fn reverify(&self, family: String) -> js_sys::Promise {
        let loader = self.loader.clone();
        future_to_promise(async move {
            loader
                .reverify(&family)
                .await
                .map(|v| verification_str(v).into())
                .map_err(to_js_error)
        })
    }

    /// Apply a font to every matching element; returns the element ids
    #[wasm_bindgen(js_name = applyToTargets)]
    pub fn apply_to_targets(&self, family: &str) -> Result<Array, JsValue> {
        let applied = self.loader.apply_to_targets(family).map_err(to_js_error)?;
        Ok(applied.elements.iter().map(|id| JsValue::from_str(id)).collect())
    }

    pub fn fonts(&self) -> Array {
        self.loader.fonts().iter().map(record_to_js).collect()
    }

    /// Call `callback` with every loader event
    #[wasm_bindgen(js_name = onEvent)]
    pub fn on_event(&self, callback: Function) {
        let events = self.loader.subscribe();
        wasm_bindgen_futures::spawn_local(async move {
            while let Ok(event) = events.recv().await {
                if let Err(e) = callback.call1(&JsValue::NULL, &event_to_js(&event)) {
                    tracing::warn!("font event listener threw: {:?}", e);
                }
            }
        });
    }
}
