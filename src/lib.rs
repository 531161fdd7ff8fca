#![cfg(target_arch = "wasm32")]
//! Browser bindings: a `RadioEngine` class over the core engine, rendered
//! through WebAudio and driven by `setInterval`/`setTimeout`.

use radio_core::{
    Engine, EngineConfig, LightningEvent, MediaInput, ScanOutcome, SharedBackend, SharedTimers,
    Station, TextureSpec,
};
use serde::Serialize;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;
use web_sys as web;

mod audio;
mod timers;

use audio::WebAudioBackend;
use timers::WebTimers;

#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Info).ok();
    log::info!("radio-web starting");
    Ok(())
}

fn to_js(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

// Descriptors arrive either as JSON text or as plain JS objects.
fn json_text(value: &JsValue) -> Result<String, JsValue> {
    if let Some(text) = value.as_string() {
        return Ok(text);
    }
    js_sys::JSON::stringify(value)
        .map(String::from)
        .map_err(|_| JsValue::from_str("descriptor is not JSON-serializable"))
}

fn parse_station(value: &JsValue) -> Result<Station, JsValue> {
    Station::from_json(&json_text(value)?).map_err(to_js)
}

fn media_input(file: Option<js_sys::Uint8Array>, mime: Option<String>) -> Option<MediaInput> {
    file.map(|bytes| MediaInput::File {
        bytes: bytes.to_vec(),
        mime,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LightningPayload {
    near: f32,
    thunder_profile: radio_core::ThunderProfile,
    intensity: f32,
}

impl LightningPayload {
    fn to_js(ev: LightningEvent) -> Option<JsValue> {
        let payload = LightningPayload {
            near: ev.near,
            thunder_profile: ev.thunder_profile,
            intensity: ev.intensity,
        };
        let text = serde_json::to_string(&payload).ok()?;
        js_sys::JSON::parse(&text).ok()
    }
}

fn build_engine() -> anyhow::Result<(Engine, Rc<WebAudioBackend>)> {
    let window = web::window().ok_or_else(|| anyhow::anyhow!("no window"))?;
    let ctx = web::AudioContext::new().map_err(|e| anyhow::anyhow!("{:?}", e))?;
    let backend = Rc::new(WebAudioBackend::new(ctx));
    let shared: SharedBackend = backend.clone();
    let timers: SharedTimers = Rc::new(WebTimers::new(window));
    let engine = Engine::new(shared, timers, EngineConfig::default());
    log::info!(
        "[radio] audio context ready at {} Hz",
        backend.context().sample_rate()
    );
    Ok((engine, backend))
}

#[wasm_bindgen]
pub struct RadioEngine {
    engine: Engine,
    backend: Rc<WebAudioBackend>,
}

#[wasm_bindgen]
impl RadioEngine {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Result<RadioEngine, JsValue> {
        let (engine, backend) = build_engine().map_err(|e| to_js(format!("{e:#}")))?;
        Ok(RadioEngine { engine, backend })
    }

    #[wasm_bindgen(js_name = powerOn)]
    pub fn power_on(&self) -> Result<(), JsValue> {
        self.engine.power_on().map_err(to_js)
    }

    #[wasm_bindgen(js_name = powerOff)]
    pub fn power_off(&self) {
        self.engine.power_off();
    }

    #[wasm_bindgen(js_name = setStation)]
    pub fn set_station(
        &self,
        station: JsValue,
        file: Option<js_sys::Uint8Array>,
        mime: Option<String>,
    ) -> Result<(), JsValue> {
        let station = parse_station(&station)?;
        self.engine
            .set_station(&station, media_input(file, mime))
            .map_err(to_js)
    }

    /// Resolves with `"locked"`, `"superseded"` or `"ignored"`.
    #[wasm_bindgen(js_name = scanToStation)]
    pub fn scan_to_station(
        &self,
        station: JsValue,
        file: Option<js_sys::Uint8Array>,
        mime: Option<String>,
        on_lock: Option<js_sys::Function>,
    ) -> Result<js_sys::Promise, JsValue> {
        let station = parse_station(&station)?;
        let on_lock: Box<dyn FnOnce()> = Box::new(move || {
            if let Some(f) = on_lock {
                if let Err(e) = f.call0(&JsValue::NULL) {
                    log::warn!("[radio] onLock threw: {:?}", e);
                }
            }
        });
        let scan = self
            .engine
            .scan_to_station(station, media_input(file, mime), on_lock);
        Ok(future_to_promise(async move {
            let outcome = scan.await.map_err(to_js)?;
            Ok(JsValue::from_str(match outcome {
                ScanOutcome::Locked => "locked",
                ScanOutcome::Superseded => "superseded",
                ScanOutcome::Ignored => "ignored",
            }))
        }))
    }

    #[wasm_bindgen(js_name = setTexture)]
    pub fn set_texture(&self, texture: JsValue) -> Result<(), JsValue> {
        let texture: TextureSpec = serde_json::from_str(&json_text(&texture)?).map_err(to_js)?;
        self.engine.set_texture(texture).map_err(to_js)
    }

    /// `"none"`, `"running"` or `"suspended"`.
    #[wasm_bindgen(js_name = getState)]
    pub fn state(&self) -> String {
        self.engine.state().as_str().to_string()
    }

    /// Spectrum in dB; empty before the first power-on.
    #[wasm_bindgen(js_name = frequencyData)]
    pub fn frequency_data(&self) -> Vec<f32> {
        let mut out = Vec::new();
        self.engine.frequency_data(&mut out);
        out
    }

    #[wasm_bindgen(js_name = getAnalyser)]
    pub fn analyser(&self) -> Option<web::AnalyserNode> {
        self.engine
            .analyser()
            .and_then(|id| self.backend.analyser_node(id))
    }

    #[wasm_bindgen(js_name = setOnLightning)]
    pub fn set_on_lightning(&self, callback: Option<js_sys::Function>) {
        let handler = callback.map(|f| {
            Rc::new(move |ev: LightningEvent| {
                let Some(payload) = LightningPayload::to_js(ev) else {
                    return;
                };
                if let Err(e) = f.call1(&JsValue::NULL, &payload) {
                    log::warn!("[radio] onLightning threw: {:?}", e);
                }
            }) as radio_core::LightningHandler
        });
        self.engine.set_on_lightning(handler);
    }
}
