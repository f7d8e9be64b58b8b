use std::sync::Arc;

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use super::automation::ParamTimeline;
use super::effect::{Compressor, Convolver};
use crate::audio_api::{Automation, FilterKind, NodeSpec, Param, Waveform};

const MAX_DELAY_SECONDS: f64 = 2.0;
const FILTER_REFRESH: u32 = 32; // k-rate coefficient updates

/// One node of the rendered graph. Every variant takes the summed input of the
/// nodes connected into it and produces one sample.
pub enum Node {
    Oscillator(Oscillator),
    Noise(Noise),
    Filter(Filter),
    Gain(Gain),
    Delay(Delay),
    Convolver(Convolver),
    Compressor(Compressor),
}

impl Node {
    pub fn from_spec(spec: NodeSpec, sample_rate: f32) -> Self {
        match spec {
            NodeSpec::Oscillator { waveform, frequency } => Node::Oscillator(Oscillator {
                waveform,
                frequency: ParamTimeline::new(frequency),
                phase: 0.0,
                window: SourceWindow::default(),
                sample_rate,
            }),
            NodeSpec::Noise { buffer } => Node::Noise(Noise { buffer, pos: 0, window: SourceWindow::default() }),
            NodeSpec::Filter { kind, frequency, q } => Node::Filter(Filter::new(kind, frequency, q, sample_rate)),
            NodeSpec::Gain { gain } => Node::Gain(Gain { gain: ParamTimeline::new(gain) }),
            NodeSpec::Delay { time } => Node::Delay(Delay::new(time, sample_rate)),
            NodeSpec::Convolver { impulse } => Node::Convolver(Convolver::new(&impulse)),
            NodeSpec::Compressor(settings) => Node::Compressor(Compressor::new(settings, sample_rate)),
        }
    }

    pub fn is_delay(&self) -> bool {
        matches!(self, Node::Delay(_))
    }

    pub fn automate(&mut self, param: Param, event: Automation) {
        let timeline = match (self, param) {
            (Node::Oscillator(o), Param::Frequency) => &mut o.frequency,
            (Node::Filter(f), Param::Frequency) => &mut f.frequency,
            (Node::Filter(f), Param::Q) => &mut f.q,
            (Node::Gain(g), Param::Gain) => &mut g.gain,
            (Node::Delay(d), Param::DelayTime) => &mut d.time,
            _ => return, // no such param on this node
        };
        timeline.apply(event);
    }

    pub fn schedule_start(&mut self, at: f64) {
        if let Some(w) = self.window_mut() {
            w.start = Some(at);
        }
    }

    pub fn schedule_stop(&mut self, at: f64) {
        if let Some(w) = self.window_mut() {
            w.stop = Some(at);
        }
    }

    fn window_mut(&mut self) -> Option<&mut SourceWindow> {
        match self {
            Node::Oscillator(o) => Some(&mut o.window),
            Node::Noise(n) => Some(&mut n.window),
            _ => None,
        }
    }

    // a source is finished once its stop time has been rendered past
    pub fn finished(&self, t: f64) -> bool {
        let window = match self {
            Node::Oscillator(o) => &o.window,
            Node::Noise(n) => &n.window,
            _ => return false,
        };
        window.stop.is_some_and(|s| t >= s)
    }

    pub fn process(&mut self, input: f32, t: f64) -> f32 {
        match self {
            Node::Oscillator(o) => o.process(t),
            Node::Noise(n) => n.process(t),
            Node::Filter(f) => f.process(input, t),
            Node::Gain(g) => input * g.gain.value_at(t) as f32,
            Node::Delay(d) => d.read(t), // input goes in through `feed`
            Node::Convolver(c) => c.process(input),
            Node::Compressor(c) => c.process(input),
        }
    }

    pub fn feed(&mut self, input: f32) {
        if let Node::Delay(d) = self {
            d.write(input);
        }
    }

    pub fn prune(&mut self, t: f64) {
        match self {
            Node::Oscillator(o) => o.frequency.prune(t),
            Node::Filter(f) => {
                f.frequency.prune(t);
                f.q.prune(t);
            }
            Node::Gain(g) => g.gain.prune(t),
            Node::Delay(d) => d.time.prune(t),
            _ => {}
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct SourceWindow {
    start: Option<f64>,
    stop: Option<f64>,
}

impl SourceWindow {
    fn active(&self, t: f64) -> bool {
        self.start.is_some_and(|s| t >= s) && self.stop.is_none_or(|s| t < s)
    }
}

pub struct Oscillator {
    waveform: Waveform,
    frequency: ParamTimeline,
    phase: f64, // 0..1
    window: SourceWindow,
    sample_rate: f32,
}

impl Oscillator {
    fn process(&mut self, t: f64) -> f32 {
        if !self.window.active(t) {
            return 0.0;
        }
        let p = self.phase as f32;
        let out = match self.waveform {
            Waveform::Sine => (std::f32::consts::TAU * p).sin(),
            Waveform::Square => if p < 0.5 { 1.0 } else { -1.0 },
            Waveform::Sawtooth => 2.0 * p - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
        };
        self.phase += self.frequency.value_at(t) / self.sample_rate as f64;
        self.phase -= self.phase.floor();
        out
    }
}

pub struct Noise {
    buffer: Arc<[f32]>,
    pos: usize,
    window: SourceWindow,
}

impl Noise {
    fn process(&mut self, t: f64) -> f32 {
        if !self.window.active(t) || self.buffer.is_empty() {
            return 0.0;
        }
        let out = self.buffer[self.pos];
        self.pos = (self.pos + 1) % self.buffer.len(); // loops
        out
    }
}

pub struct Filter {
    kind: FilterKind,
    frequency: ParamTimeline,
    q: ParamTimeline,
    biquad: DirectForm2Transposed<f32>,
    countdown: u32,
    sample_rate: f32,
}

impl Filter {
    fn new(kind: FilterKind, frequency: f64, q: f64, sample_rate: f32) -> Self {
        let coeffs = coefficients(kind, frequency as f32, q as f32, sample_rate)
            .unwrap_or(Coefficients { a1: 0.0, a2: 0.0, b0: 1.0, b1: 0.0, b2: 0.0 }); // passthrough
        Self {
            kind,
            frequency: ParamTimeline::new(frequency),
            q: ParamTimeline::new(q),
            biquad: DirectForm2Transposed::<f32>::new(coeffs),
            countdown: 0,
            sample_rate,
        }
    }

    fn process(&mut self, input: f32, t: f64) -> f32 {
        if self.countdown == 0 {
            let f = self.frequency.value_at(t) as f32;
            let q = self.q.value_at(t) as f32;
            if let Some(c) = coefficients(self.kind, f, q, self.sample_rate) {
                self.biquad.update_coefficients(c);
            }
            self.countdown = FILTER_REFRESH;
        }
        self.countdown -= 1;
        self.biquad.run(input)
    }
}

fn coefficients(kind: FilterKind, frequency: f32, q: f32, sample_rate: f32) -> Option<Coefficients<f32>> {
    let ty = match kind {
        FilterKind::LowPass => Type::LowPass,
        FilterKind::HighPass => Type::HighPass,
        FilterKind::BandPass => Type::BandPass,
    };
    let f0 = frequency.clamp(10.0, sample_rate * 0.45);
    Coefficients::<f32>::from_params(ty, sample_rate.hz(), f0.hz(), q.max(0.01)).ok()
}

pub struct Gain {
    gain: ParamTimeline,
}

pub struct Delay {
    time: ParamTimeline,
    line: Vec<f32>,
    write: usize,
    sample_rate: f32,
}

impl Delay {
    fn new(time: f64, sample_rate: f32) -> Self {
        let len = (MAX_DELAY_SECONDS * sample_rate as f64) as usize + 2;
        Self { time: ParamTimeline::new(time), line: vec![0.0; len], write: 0, sample_rate }
    }

    fn read(&self, t: f64) -> f32 {
        let len = self.line.len();
        let max = (len - 2) as f64;
        let d = (self.time.value_at(t) * self.sample_rate as f64).clamp(1.0, max);
        let whole = d.floor() as usize;
        let frac = (d - whole as f64) as f32;
        let a = self.line[(self.write + len - whole) % len];
        let b = self.line[(self.write + len - whole - 1) % len];
        a * (1.0 - frac) + b * frac
    }

    fn write(&mut self, x: f32) {
        self.line[self.write] = x;
        self.write = (self.write + 1) % self.line.len();
    }
}
