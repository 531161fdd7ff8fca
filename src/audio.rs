use fnv::FnvHashMap;
use radio_core::graph::{
    AudioBackend, Automation, FilterKind, LimiterSettings, NodeId, NodeSpec, Param, ParamRef,
    Waveform,
};
use radio_core::noise::{NoiseBuffer, NoiseColor};
use radio_core::{MediaInput, RadioError, Result};
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys as web;

fn js_err(op: &'static str, e: JsValue) -> RadioError {
    RadioError::backend(op, format!("{:?}", e))
}

enum WebNode {
    Gain(web::GainNode),
    Filter(web::BiquadFilterNode),
    Oscillator(web::OscillatorNode),
    Noise(web::AudioBufferSourceNode),
    Panner(web::StereoPannerNode),
    Limiter(web::DynamicsCompressorNode),
    Analyser(web::AnalyserNode),
    Media {
        element: web::HtmlAudioElement,
        node: web::MediaElementAudioSourceNode,
        object_url: Option<String>,
    },
}

impl WebNode {
    fn audio_node(&self) -> &web::AudioNode {
        match self {
            WebNode::Gain(n) => n,
            WebNode::Filter(n) => n,
            WebNode::Oscillator(n) => n,
            WebNode::Noise(n) => n,
            WebNode::Panner(n) => n,
            WebNode::Limiter(n) => n,
            WebNode::Analyser(n) => n,
            WebNode::Media { node, .. } => node,
        }
    }

    fn param(&self, param: Param) -> Option<web::AudioParam> {
        match (self, param) {
            (WebNode::Gain(n), Param::Gain) => Some(n.gain()),
            (WebNode::Filter(n), Param::Frequency) => Some(n.frequency()),
            (WebNode::Filter(n), Param::Q) => Some(n.q()),
            (WebNode::Oscillator(n), Param::Frequency) => Some(n.frequency()),
            (WebNode::Panner(n), Param::Pan) => Some(n.pan()),
            _ => None,
        }
    }
}

fn create_gain(ctx: &web::AudioContext, value: f32) -> Result<web::GainNode> {
    let g = web::GainNode::new(ctx).map_err(|e| js_err("create gain", e))?;
    g.gain().set_value(value);
    Ok(g)
}

fn create_filter(
    ctx: &web::AudioContext,
    kind: FilterKind,
    frequency: f32,
    q: f32,
) -> Result<web::BiquadFilterNode> {
    let f = web::BiquadFilterNode::new(ctx).map_err(|e| js_err("create filter", e))?;
    f.set_type(match kind {
        FilterKind::Lowpass => web::BiquadFilterType::Lowpass,
        FilterKind::Highpass => web::BiquadFilterType::Highpass,
        FilterKind::Bandpass => web::BiquadFilterType::Bandpass,
    });
    f.frequency().set_value(frequency);
    f.q().set_value(q);
    Ok(f)
}

fn create_limiter(
    ctx: &web::AudioContext,
    s: &LimiterSettings,
) -> Result<web::DynamicsCompressorNode> {
    let c = web::DynamicsCompressorNode::new(ctx).map_err(|e| js_err("create limiter", e))?;
    c.threshold().set_value(s.threshold_db);
    c.knee().set_value(s.knee_db);
    c.ratio().set_value(s.ratio);
    c.attack().set_value(s.attack_sec);
    c.release().set_value(s.release_sec);
    Ok(c)
}

// Looping `<audio>` element routed into the graph; file bytes go through a blob URL.
fn create_media(ctx: &web::AudioContext, input: MediaInput) -> Result<WebNode> {
    let element = web::HtmlAudioElement::new().map_err(|e| js_err("create audio element", e))?;
    element.set_preload("auto");
    element.set_loop(true);
    element.set_cross_origin(Some("anonymous"));

    let object_url = match input {
        MediaInput::Url(url) => {
            element.set_src(&url);
            None
        }
        MediaInput::File { bytes, mime } => {
            let data = js_sys::Uint8Array::from(bytes.as_slice());
            let parts = js_sys::Array::of1(&data);
            let bag = web::BlobPropertyBag::new();
            if let Some(mime) = &mime {
                bag.set_type(mime);
            }
            let blob = web::Blob::new_with_u8_array_sequence_and_options(&parts, &bag)
                .map_err(|e| js_err("create blob", e))?;
            let url = web::Url::create_object_url_with_blob(&blob)
                .map_err(|e| js_err("create object url", e))?;
            element.set_src(&url);
            Some(url)
        }
    };

    match ctx.create_media_element_source(&element) {
        Ok(node) => Ok(WebNode::Media {
            element,
            node,
            object_url,
        }),
        Err(e) => {
            if let Some(url) = &object_url {
                _ = web::Url::revoke_object_url(url);
            }
            Err(js_err("create media source", e))
        }
    }
}

/// `AudioBackend` over a single `AudioContext`. Node handles live in a map
/// keyed by `NodeId` until released.
pub struct WebAudioBackend {
    ctx: web::AudioContext,
    nodes: RefCell<FnvHashMap<NodeId, WebNode>>,
    buffers: RefCell<FnvHashMap<(u32, NoiseColor), web::AudioBuffer>>,
    next_id: Cell<u32>,
}

impl WebAudioBackend {
    pub fn new(ctx: web::AudioContext) -> Self {
        Self {
            ctx,
            nodes: RefCell::new(FnvHashMap::default()),
            buffers: RefCell::new(FnvHashMap::default()),
            next_id: Cell::new(0),
        }
    }

    pub fn context(&self) -> &web::AudioContext {
        &self.ctx
    }

    pub fn analyser_node(&self, id: NodeId) -> Option<web::AnalyserNode> {
        match self.nodes.borrow().get(&id) {
            Some(WebNode::Analyser(a)) => Some(a.clone()),
            _ => None,
        }
    }

    // Upload each noise buffer once per context.
    fn audio_buffer(&self, noise: &NoiseBuffer) -> Result<web::AudioBuffer> {
        let key = (noise.sample_rate, noise.color);
        if let Some(buf) = self.buffers.borrow().get(&key) {
            return Ok(buf.clone());
        }
        let buf = self
            .ctx
            .create_buffer(
                noise.channels() as u32,
                noise.frames() as u32,
                noise.sample_rate as f32,
            )
            .map_err(|e| js_err("create buffer", e))?;
        for ch in 0..noise.channels() {
            let mut data = noise.channel(ch).to_vec();
            buf.copy_to_channel(&mut data, ch as i32)
                .map_err(|e| js_err("copy to channel", e))?;
        }
        self.buffers.borrow_mut().insert(key, buf.clone());
        Ok(buf)
    }

    fn create_noise(&self, noise: &Arc<NoiseBuffer>) -> Result<web::AudioBufferSourceNode> {
        let buffer = self.audio_buffer(noise)?;
        let src = web::AudioBufferSourceNode::new(&self.ctx)
            .map_err(|e| js_err("create buffer source", e))?;
        src.set_buffer(Some(&buffer));
        src.set_loop(true);
        Ok(src)
    }

    fn with_node<T>(&self, id: NodeId, f: impl FnOnce(&WebNode) -> Result<T>) -> Result<T> {
        let nodes = self.nodes.borrow();
        let node = nodes.get(&id).ok_or(RadioError::UnknownNode(id.0))?;
        f(node)
    }

    fn audio_param(&self, param: ParamRef) -> Result<web::AudioParam> {
        self.with_node(param.node, |n| {
            n.param(param.param).ok_or_else(|| {
                RadioError::backend("param", format!("{} has no {:?}", param.node, param.param))
            })
        })
    }
}

// Settle a promise in the background; rejections are only logged.
fn settle(what: &'static str, promise: std::result::Result<js_sys::Promise, JsValue>) {
    match promise {
        Ok(p) => spawn_local(async move {
            if let Err(e) = JsFuture::from(p).await {
                log::debug!("[web-audio] {} rejected: {:?}", what, e);
            }
        }),
        Err(e) => log::debug!("[web-audio] {} failed: {:?}", what, e),
    }
}

impl AudioBackend for WebAudioBackend {
    fn current_time(&self) -> f64 {
        self.ctx.current_time()
    }

    fn sample_rate(&self) -> f32 {
        self.ctx.sample_rate()
    }

    fn create(&self, spec: NodeSpec, label: &'static str) -> Result<NodeId> {
        let ctx = &self.ctx;
        let node = match spec {
            NodeSpec::Gain { value } => WebNode::Gain(create_gain(ctx, value)?),
            NodeSpec::Filter { kind, frequency, q } => {
                WebNode::Filter(create_filter(ctx, kind, frequency, q)?)
            }
            NodeSpec::Oscillator {
                waveform,
                frequency,
            } => {
                let osc = web::OscillatorNode::new(ctx).map_err(|e| js_err("create oscillator", e))?;
                osc.set_type(match waveform {
                    Waveform::Sine => web::OscillatorType::Sine,
                    Waveform::Triangle => web::OscillatorType::Triangle,
                });
                osc.frequency().set_value(frequency);
                WebNode::Oscillator(osc)
            }
            NodeSpec::Noise { buffer } => WebNode::Noise(self.create_noise(&buffer)?),
            NodeSpec::Panner { pan } => {
                let p = web::StereoPannerNode::new(ctx).map_err(|e| js_err("create panner", e))?;
                p.pan().set_value(pan);
                WebNode::Panner(p)
            }
            NodeSpec::Limiter(settings) => WebNode::Limiter(create_limiter(ctx, &settings)?),
            NodeSpec::Analyser {
                fft_size,
                smoothing,
            } => {
                let a = web::AnalyserNode::new(ctx).map_err(|e| js_err("create analyser", e))?;
                a.set_fft_size(fft_size);
                a.set_smoothing_time_constant(smoothing);
                WebNode::Analyser(a)
            }
            NodeSpec::Media(input) => create_media(ctx, input)?,
        };
        let id = NodeId(self.next_id.get());
        self.next_id.set(id.0.wrapping_add(1));
        self.nodes.borrow_mut().insert(id, node);
        log::debug!("[web-audio] {} {}", label, id);
        Ok(id)
    }

    fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        let nodes = self.nodes.borrow();
        let (Some(a), Some(b)) = (nodes.get(&from), nodes.get(&to)) else {
            return Err(RadioError::UnknownNode(if nodes.contains_key(&from) { to.0 } else { from.0 }));
        };
        a.audio_node()
            .connect_with_audio_node(b.audio_node())
            .map(|_| ())
            .map_err(|e| js_err("connect", e))
    }

    fn connect_param(&self, from: NodeId, to: ParamRef) -> Result<()> {
        let param = self.audio_param(to)?;
        self.with_node(from, |n| {
            n.audio_node()
                .connect_with_audio_param(&param)
                .map_err(|e| js_err("connect param", e))
        })
    }

    fn connect_destination(&self, from: NodeId) -> Result<()> {
        let destination = self.ctx.destination();
        self.with_node(from, |n| {
            n.audio_node()
                .connect_with_audio_node(&destination)
                .map(|_| ())
                .map_err(|e| js_err("connect destination", e))
        })
    }

    fn disconnect(&self, node: NodeId) {
        if let Some(n) = self.nodes.borrow().get(&node) {
            _ = n.audio_node().disconnect();
        }
    }

    fn start(&self, node: NodeId, when: Option<f64>) -> Result<()> {
        self.with_node(node, |n| match n {
            WebNode::Oscillator(src) => match when {
                Some(t) => src.start_with_when(t),
                None => src.start(),
            }
            .map_err(|e| js_err("start", e)),
            WebNode::Noise(src) => match when {
                Some(t) => src.start_with_when(t),
                None => src.start(),
            }
            .map_err(|e| js_err("start", e)),
            // Autoplay policy may reject play(); that is not an engine error.
            WebNode::Media { element, .. } => {
                settle("play", element.play());
                Ok(())
            }
            _ => Err(RadioError::backend("start", format!("{} is not a source", node))),
        })
    }

    fn stop(&self, node: NodeId, when: Option<f64>) {
        let nodes = self.nodes.borrow();
        let result = match nodes.get(&node) {
            Some(WebNode::Oscillator(src)) => match when {
                Some(t) => src.stop_with_when(t),
                None => src.stop(),
            },
            Some(WebNode::Noise(src)) => match when {
                Some(t) => src.stop_with_when(t),
                None => src.stop(),
            },
            Some(WebNode::Media { element, .. }) => element.pause(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::debug!("[web-audio] stop {} ignored: {:?}", node, e);
        }
    }

    fn on_ended(&self, node: NodeId, callback: Box<dyn FnOnce()>) {
        let nodes = self.nodes.borrow();
        let handler = || Closure::once_into_js(move || callback());
        match nodes.get(&node) {
            Some(WebNode::Oscillator(src)) => src.set_onended(Some(handler().unchecked_ref())),
            Some(WebNode::Noise(src)) => src.set_onended(Some(handler().unchecked_ref())),
            _ => {}
        }
    }

    fn param_value(&self, param: ParamRef) -> f32 {
        self.audio_param(param).map_or(0.0, |p| p.value())
    }

    fn automate(&self, param: ParamRef, automation: Automation) -> Result<()> {
        let p = self.audio_param(param)?;
        match automation {
            Automation::SetValueAtTime { value, time } => p.set_value_at_time(value, time),
            Automation::ExponentialRampToValueAtTime { value, time } => {
                p.exponential_ramp_to_value_at_time(value, time)
            }
            Automation::CancelScheduledValues { time } => p.cancel_scheduled_values(time),
        }
        .map(|_| ())
        .map_err(|e| js_err("automate", e))
    }

    fn release(&self, node: NodeId) {
        let Some(n) = self.nodes.borrow_mut().remove(&node) else {
            return;
        };
        _ = n.audio_node().disconnect();
        if let WebNode::Media {
            element,
            object_url,
            ..
        } = n
        {
            _ = element.pause();
            _ = element.remove_attribute("src");
            element.load();
            if let Some(url) = object_url {
                _ = web::Url::revoke_object_url(&url);
                log::debug!("[web-audio] revoked {}", url);
            }
        }
    }

    fn resume(&self) -> Result<()> {
        settle("resume", self.ctx.resume());
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        settle("suspend", self.ctx.suspend());
        Ok(())
    }

    fn frequency_data(&self, analyser: NodeId, out: &mut Vec<f32>) {
        if let Some(WebNode::Analyser(a)) = self.nodes.borrow().get(&analyser) {
            out.resize(a.frequency_bin_count() as usize, 0.0);
            a.get_float_frequency_data(out.as_mut_slice());
        } else {
            out.clear();
        }
    }
}
