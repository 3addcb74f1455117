//! Browser timers, task spawning and network access

use std::time::Duration;

use futures::future::LocalBoxFuture;
use js_sys::{Date, Promise, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Request, RequestCache, RequestInit, Response};

use fontpipe_core::{AcquireError, EventLoop, Fetcher};

fn describe(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

/// `setTimeout` + `spawn_local` event loop
#[derive(Clone, Copy, Debug, Default)]
pub struct WebEventLoop;

impl EventLoop for WebEventLoop {
    fn now_millis(&self) -> u64 {
        Date::now() as u64
    }

    fn sleep(&self, delay: Duration) -> LocalBoxFuture<'static, ()> {
        let ms = delay.as_millis().min(i32::MAX as u128) as i32;
        let timer = Promise::new(&mut |resolve, _reject| {
            let Some(window) = web_sys::window() else {
                let _ = resolve.call0(&JsValue::NULL);
                return;
            };
            if let Err(e) = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, ms) {
                tracing::error!("setTimeout failed: {}", describe(&e));
                let _ = resolve.call0(&JsValue::NULL);
            }
        });
        Box::pin(async move {
            let _ = JsFuture::from(timer).await;
        })
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

/// `fetch` with the HTTP cache bypassed
#[derive(Clone, Copy, Debug, Default)]
pub struct WebFetcher;

impl WebFetcher {
    async fn fetch_bytes(url: String) -> Result<Vec<u8>, AcquireError> {
        let network = |e: JsValue| AcquireError::Network { message: describe(&e) };

        let window = web_sys::window().ok_or_else(|| AcquireError::Network {
            message: "no global window".to_string(),
        })?;
        let init = RequestInit::new();
        init.set_method("GET");
        init.set_cache(RequestCache::NoStore);
        let request = Request::new_with_str_and_init(&url, &init)
            .map_err(|_| AcquireError::InvalidUrl { url: url.clone() })?;

        let response: Response = JsFuture::from(window.fetch_with_request(&request))
            .await
            .map_err(network)?
            .dyn_into()
            .map_err(network)?;
        if !response.ok() {
            return Err(AcquireError::Http {
                status: response.status(),
                status_text: response.status_text(),
            });
        }

        let buffer = JsFuture::from(response.array_buffer().map_err(network)?)
            .await
            .map_err(|e| AcquireError::Unreadable { message: describe(&e) })?;
        Ok(Uint8Array::new(&buffer).to_vec())
    }
}

impl Fetcher for WebFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, AcquireError>> {
        Box::pin(Self::fetch_bytes(url.to_string()))
    }
}
