// Voice builder and the arena that owns every voice until it is torn down.
//
// A voice is the handful of nodes one musical event needs. It is built
// against the render clock, then owned by the arena; it frees its nodes
// exactly once, either when the backend reports its sources ended or when
// the reaper finds it past its deadline, whichever comes first.

use std::collections::HashMap;
use std::sync::Arc;

use super::mixbus::BusInputs;
use super::pattern::{VoiceKind, VoiceRequest};
use crate::audio_api::{BackendError, Endpoint, FilterKind, NodeId, Param, SignalBackend, Waveform};

/// Floor for exponential ramps, which can't reach zero.
pub const EPSILON: f64 = 0.001;

const LEAD_ECHO_TIME: f64 = 0.18;
const LEAD_ECHO_FEEDBACK: f64 = 0.35;
const LEAD_ECHO_RING: f64 = 0.9; // feedback fades to zero over this

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ramp {
    Instant,
    Linear,
    Exponential,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Breakpoint {
    pub offset: f64, // seconds from the voice start
    pub value: f64,
    pub ramp: Ramp,
}

/// Ordered automation breakpoints, applied relative to a start time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Envelope {
    points: Vec<Breakpoint>,
}

impl Envelope {
    pub fn starting_at(value: f64) -> Self {
        Self { points: vec![Breakpoint { offset: 0.0, value, ramp: Ramp::Instant }] }
    }

    pub fn instant(self, offset: f64, value: f64) -> Self {
        self.push(offset, value, Ramp::Instant)
    }

    pub fn linear(self, offset: f64, value: f64) -> Self {
        self.push(offset, value, Ramp::Linear)
    }

    pub fn exponential(self, offset: f64, value: f64) -> Self {
        self.push(offset, value.max(EPSILON), Ramp::Exponential)
    }

    // offsets never go backwards
    fn push(mut self, offset: f64, value: f64, ramp: Ramp) -> Self {
        let floor = self.points.last().map_or(0.0, |p| p.offset);
        self.points.push(Breakpoint { offset: offset.max(floor), value, ramp });
        self
    }

    pub fn points(&self) -> &[Breakpoint] {
        &self.points
    }

    pub fn end(&self) -> f64 {
        self.points.last().map_or(0.0, |p| p.offset)
    }

    pub fn apply<B: SignalBackend + ?Sized>(
        &self,
        backend: &mut B,
        node: NodeId,
        param: Param,
        start: f64,
    ) -> Result<(), BackendError> {
        for p in &self.points {
            let at = start + p.offset;
            match p.ramp {
                Ramp::Instant => backend.set_value_at_time(node, param, p.value, at)?,
                Ramp::Linear => backend.linear_ramp_to_value_at_time(node, param, p.value, at)?,
                Ramp::Exponential => backend.exponential_ramp_to_value_at_time(node, param, p.value, at)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Voice {
    label: &'static str,
    nodes: Vec<NodeId>,
    sources: Vec<NodeId>,
    sources_stop: f64,
    stop_at: f64, // sources_stop plus any echo tail
    released: bool,
}

impl Voice {
    fn new(label: &'static str) -> Self {
        Self { label, nodes: Vec::new(), sources: Vec::new(), sources_stop: 0.0, stop_at: 0.0, released: false }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn sources(&self) -> &[NodeId] {
        &self.sources
    }

    /// Last moment the voice can be audible, echoes included.
    pub fn stop_at(&self) -> f64 {
        self.stop_at
    }

    pub fn sources_stop(&self) -> f64 {
        self.sources_stop
    }

    fn is_echoing(&self) -> bool {
        self.stop_at > self.sources_stop
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Free every owned node. Only the first call does anything; returns
    /// whether this call was the one that released.
    pub fn release<B: SignalBackend + ?Sized>(&mut self, backend: &mut B) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        for &node in &self.nodes {
            backend.disconnect(node);
        }
        true
    }

    fn node<B: SignalBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        create: impl FnOnce(&mut B) -> Result<NodeId, BackendError>,
    ) -> Result<NodeId, BackendError> {
        let id = create(backend)?;
        self.nodes.push(id);
        Ok(id)
    }

    fn source<B: SignalBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        create: impl FnOnce(&mut B) -> Result<NodeId, BackendError>,
    ) -> Result<NodeId, BackendError> {
        let id = self.node(backend, create)?;
        self.sources.push(id);
        Ok(id)
    }
}

// connect a -> b -> c ... -> last
fn chain<B: SignalBackend + ?Sized>(backend: &mut B, nodes: &[NodeId], out: Endpoint) -> Result<(), BackendError> {
    for pair in nodes.windows(2) {
        backend.connect(pair[0], Endpoint::Node(pair[1]))?;
    }
    if let Some(&last) = nodes.last() {
        backend.connect(last, out)?;
    }
    Ok(())
}

/// Build and schedule the voice for `req` at absolute time `start`. On any
/// backend failure the nodes created so far are released before returning.
pub fn build<B: SignalBackend + ?Sized>(
    backend: &mut B,
    req: &VoiceRequest,
    start: f64,
    bus: &BusInputs,
    noise: &Arc<[f32]>,
) -> Result<Voice, BackendError> {
    let mut voice = Voice::new(req.kind.label());
    let t = start + req.offset;
    match assemble(backend, &mut voice, req, t, bus, noise) {
        Ok(()) => Ok(voice),
        Err(e) => {
            voice.release(backend);
            Err(e)
        }
    }
}

fn assemble<B: SignalBackend + ?Sized>(
    backend: &mut B,
    voice: &mut Voice,
    req: &VoiceRequest,
    t: f64,
    bus: &BusInputs,
    noise: &Arc<[f32]>,
) -> Result<(), BackendError> {
    let g = req.gain;
    let sidechain = Endpoint::Node(bus.sidechain);
    let mut echo = 0.0;

    let stop = match req.kind {
        VoiceKind::Kick => {
            let osc = voice.source(backend, |b| b.create_oscillator(Waveform::Sine, 150.0))?;
            let amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(150.0).exponential(0.12, 40.0).apply(backend, osc, Param::Frequency, t)?;
            Envelope::starting_at(g).exponential(0.45, EPSILON).apply(backend, amp, Param::Gain, t)?;
            chain(backend, &[osc, amp], sidechain)?;
            t + 0.5
        }
        VoiceKind::Snare => {
            let src = voice.source(backend, |b| b.create_noise_source(Arc::clone(noise)))?;
            let hp = voice.node(backend, |b| b.create_filter(FilterKind::HighPass, 1000.0, 0.7))?;
            let amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(g).exponential(0.2, EPSILON).apply(backend, amp, Param::Gain, t)?;
            chain(backend, &[src, hp, amp], sidechain)?;

            // tonal body
            let body = voice.source(backend, |b| b.create_oscillator(Waveform::Triangle, 180.0))?;
            let body_amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(g * 0.5).exponential(0.1, EPSILON).apply(backend, body_amp, Param::Gain, t)?;
            chain(backend, &[body, body_amp], sidechain)?;
            t + 0.25
        }
        VoiceKind::HiHat { open } => {
            let decay = if open { 0.3 } else { 0.05 };
            let src = voice.source(backend, |b| b.create_noise_source(Arc::clone(noise)))?;
            let hp = voice.node(backend, |b| b.create_filter(FilterKind::HighPass, 7000.0, 1.0))?;
            let amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(g).exponential(decay, EPSILON).apply(backend, amp, Param::Gain, t)?;
            chain(backend, &[src, hp, amp], sidechain)?;
            t + decay + 0.02
        }
        VoiceKind::Bass { freq, cutoff, length } => {
            let osc = voice.source(backend, |b| b.create_oscillator(Waveform::Sawtooth, freq))?;
            let lp = voice.node(backend, |b| b.create_filter(FilterKind::LowPass, cutoff, 6.0))?;
            let amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(cutoff * 2.5).exponential(length * 0.6, cutoff).apply(backend, lp, Param::Frequency, t)?;
            Envelope::starting_at(0.0)
                .linear(0.01, g)
                .exponential(length, EPSILON)
                .apply(backend, amp, Param::Gain, t)?;
            chain(backend, &[osc, lp, amp], sidechain)?;
            t + length + 0.05
        }
        VoiceKind::Lead { freq, waveform, length } => {
            let osc = voice.source(backend, |b| b.create_oscillator(waveform, freq))?;
            let lp = voice.node(backend, |b| b.create_filter(FilterKind::LowPass, 2400.0, 1.0))?;
            let amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(0.0)
                .linear(0.01, g)
                .exponential(length, EPSILON)
                .apply(backend, amp, Param::Gain, t)?;
            chain(backend, &[osc, lp, amp], sidechain)?;
            let stop = t + length + 0.05;

            // echo: amp -> delay -> feedback -> delay, feedback -> bus
            let delay = voice.node(backend, |b| b.create_delay(LEAD_ECHO_TIME))?;
            let feedback = voice.node(backend, |b| b.create_gain(LEAD_ECHO_FEEDBACK))?;
            let held = stop - t;
            Envelope::starting_at(LEAD_ECHO_FEEDBACK)
                .linear(held, LEAD_ECHO_FEEDBACK)
                .linear(held + LEAD_ECHO_RING, 0.0)
                .apply(backend, feedback, Param::Gain, t)?;
            backend.connect(amp, Endpoint::Node(delay))?;
            backend.connect(delay, Endpoint::Node(feedback))?;
            backend.connect(feedback, Endpoint::Node(delay))?;
            backend.connect(feedback, sidechain)?;
            echo = LEAD_ECHO_RING;
            stop
        }
        VoiceKind::Pad { freq, waveform, length } => {
            let osc = voice.source(backend, |b| b.create_oscillator(waveform, freq))?;
            let lp = voice.node(backend, |b| b.create_filter(FilterKind::LowPass, 1200.0, 0.7))?;
            let amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(0.0)
                .linear(length * 0.3, g)
                .linear(length * 0.7, g * 0.8)
                .linear(length, 0.0)
                .apply(backend, amp, Param::Gain, t)?;
            chain(backend, &[osc, lp, amp], Endpoint::Node(bus.reverb))?;
            t + length
        }
        VoiceKind::NoiseSwell { length } => {
            let src = voice.source(backend, |b| b.create_noise_source(Arc::clone(noise)))?;
            let bp = voice.node(backend, |b| b.create_filter(FilterKind::BandPass, 300.0, 1.5))?;
            let amp = voice.node(backend, |b| b.create_gain(0.0))?;
            Envelope::starting_at(300.0).exponential(length, 6000.0).apply(backend, bp, Param::Frequency, t)?;
            Envelope::starting_at(0.0)
                .linear(length * 0.9, g)
                .linear(length, 0.0)
                .apply(backend, amp, Param::Gain, t)?;
            chain(backend, &[src, bp, amp], sidechain)?;
            t + length
        }
    };

    // every source of a voice shares one start and one stop
    for &src in &voice.sources {
        backend.start(src, t)?;
        backend.stop(src, stop)?;
    }
    voice.sources_stop = stop;
    voice.stop_at = stop + echo;
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoiceKey(usize);

/// Owns the live voices. Slots are reused once a voice is released.
#[derive(Debug, Default)]
pub struct VoiceArena {
    slots: Vec<Option<Voice>>,
    free: Vec<usize>,
    by_source: HashMap<NodeId, usize>,
}

impl VoiceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, voice: Voice) -> VoiceKey {
        let slot = match self.free.pop() {
            Some(i) => i,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        for &src in voice.sources() {
            self.by_source.insert(src, slot);
        }
        self.slots[slot] = Some(voice);
        VoiceKey(slot)
    }

    pub fn get(&self, key: VoiceKey) -> Option<&Voice> {
        self.slots.get(key.0).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release_slot<B: SignalBackend + ?Sized>(&mut self, backend: &mut B, slot: usize) -> bool {
        let Some(mut voice) = self.slots.get_mut(slot).and_then(Option::take) else {
            return false;
        };
        for src in voice.sources() {
            self.by_source.remove(src);
        }
        self.free.push(slot);
        voice.release(backend)
    }

    /// The backend says `source` finished playing. Voices whose echo is
    /// still fading are left for the reaper.
    pub fn source_ended<B: SignalBackend + ?Sized>(&mut self, backend: &mut B, source: NodeId) -> bool {
        let Some(&slot) = self.by_source.get(&source) else {
            return false;
        };
        if self.slots[slot].as_ref().is_some_and(Voice::is_echoing) {
            return false;
        }
        self.release_slot(backend, slot)
    }

    /// Release every voice whose stop time is at least `tail` seconds before
    /// `now`. Returns how many were released.
    pub fn reap<B: SignalBackend + ?Sized>(&mut self, backend: &mut B, now: f64, tail: f64) -> usize {
        let due: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().filter(|v| v.stop_at() + tail <= now).map(|_| i))
            .collect();
        due.into_iter().filter(|&slot| self.release_slot(backend, slot)).count()
    }

    pub fn release_all<B: SignalBackend + ?Sized>(&mut self, backend: &mut B) -> usize {
        (0..self.slots.len()).filter(|&slot| self.release_slot(backend, slot)).count()
    }

    /// The latest stop time among live voices, if any voice is live.
    pub fn last_stop(&self) -> Option<f64> {
        self.slots.iter().flatten().map(Voice::stop_at).reduce(f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{RecordingBackend, white_noise};
    use crate::audio_api::{Automation, NodeSpec};

    fn setup() -> (RecordingBackend, BusInputs, Arc<[f32]>) {
        let mut b = RecordingBackend::new(48_000);
        let bus = BusInputs {
            master: b.create_gain(1.0).unwrap(),
            sidechain: b.create_gain(1.0).unwrap(),
            reverb: b.create_gain(1.0).unwrap(),
        };
        (b, bus, white_noise(1024, 1))
    }

    fn req(kind: VoiceKind) -> VoiceRequest {
        VoiceRequest { kind, gain: 0.5, offset: 0.0 }
    }

    #[test]
    fn exponential_breakpoints_never_hit_zero() {
        let env = Envelope::starting_at(1.0).exponential(0.3, 0.0).linear(0.5, 0.0);
        assert_eq!(env.points()[1].value, EPSILON);
        assert_eq!(env.points()[2].value, 0.0); // linear may reach zero
        assert_eq!(env.end(), 0.5);
    }

    #[test]
    fn breakpoint_offsets_are_monotonic() {
        let env = Envelope::starting_at(0.0).linear(0.4, 1.0).linear(0.1, 0.5);
        let offsets: Vec<f64> = env.points().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0.0, 0.4, 0.4]);
    }

    #[test]
    fn envelope_applies_at_absolute_times() {
        let (mut b, _, _) = setup();
        let g = b.create_gain(0.0).unwrap();
        Envelope::starting_at(0.8).exponential(0.25, 0.0).apply(&mut b, g, Param::Gain, 10.0).unwrap();
        let events = b.timeline(g, Param::Gain).unwrap().events();
        assert_eq!(
            events,
            &[
                Automation::SetValue { value: 0.8, time: 10.0 },
                Automation::ExponentialRamp { value: EPSILON, time: 10.25 },
            ]
        );
    }

    #[test]
    fn kick_goes_to_the_sidechain_and_stops_at_half_a_second() {
        let (mut b, bus, noise) = setup();
        let v = build(&mut b, &req(VoiceKind::Kick), 2.0, &bus, &noise).unwrap();
        assert_eq!(v.sources().len(), 1);
        let osc = b.node(v.sources()[0]).unwrap();
        assert_eq!(osc.start, Some(2.0));
        assert_eq!(osc.stop, Some(2.5));
        let amp = b.node(v.nodes()[1]).unwrap();
        assert_eq!(amp.outputs, vec![Endpoint::Node(bus.sidechain)]);
        assert_eq!(v.stop_at(), v.sources_stop());
    }

    #[test]
    fn every_source_shares_start_and_stop() {
        let (mut b, bus, noise) = setup();
        let v = build(&mut b, &req(VoiceKind::Snare), 1.0, &bus, &noise).unwrap();
        assert_eq!(v.sources().len(), 2);
        for &src in v.sources() {
            let n = b.node(src).unwrap();
            assert_eq!(n.start, Some(1.0));
            assert_eq!(n.stop, Some(v.stop_at()));
        }
    }

    #[test]
    fn pads_route_into_reverb() {
        let (mut b, bus, noise) = setup();
        let kind = VoiceKind::Pad { freq: 220.0, waveform: Waveform::Sine, length: 4.0 };
        let v = build(&mut b, &req(kind), 0.0, &bus, &noise).unwrap();
        let last = *v.nodes().last().unwrap();
        assert_eq!(b.node(last).unwrap().outputs, vec![Endpoint::Node(bus.reverb)]);
        assert_eq!(v.stop_at(), 4.0);
    }

    #[test]
    fn lead_echo_loops_through_its_delay() {
        let (mut b, bus, noise) = setup();
        let kind = VoiceKind::Lead { freq: 440.0, waveform: Waveform::Square, length: 0.1 };
        let v = build(&mut b, &req(kind), 0.0, &bus, &noise).unwrap();
        let delay = v
            .nodes()
            .iter()
            .copied()
            .find(|&n| matches!(b.node(n).unwrap().spec, NodeSpec::Delay { .. }))
            .unwrap();
        let feedback = match b.node(delay).unwrap().outputs[0] {
            Endpoint::Node(n) => n,
            Endpoint::Output => panic!("delay wired to output"),
        };
        assert!(b.node(feedback).unwrap().outputs.contains(&Endpoint::Node(delay)));
        assert!(v.stop_at() > v.sources_stop());
    }

    #[test]
    fn lead_echo_is_silent_by_the_voice_stop() {
        let (mut b, bus, noise) = setup();
        let kind = VoiceKind::Lead { freq: 440.0, waveform: Waveform::Square, length: 0.1 };
        let v = build(&mut b, &req(kind), 1.0, &bus, &noise).unwrap();
        let osc = b.node(v.sources()[0]).unwrap();
        assert_eq!(osc.stop, Some(v.sources_stop()));
        let delay = v
            .nodes()
            .iter()
            .copied()
            .find(|&n| matches!(b.node(n).unwrap().spec, NodeSpec::Delay { .. }))
            .unwrap();
        let Endpoint::Node(feedback) = b.node(delay).unwrap().outputs[0] else {
            panic!("delay wired to output");
        };
        let tl = b.timeline(feedback, Param::Gain).unwrap();
        assert!((tl.value_at(v.sources_stop()) - LEAD_ECHO_FEEDBACK).abs() < 1e-9);
        assert!(tl.value_at(v.stop_at()).abs() < 1e-9);
        assert!((v.stop_at() - v.sources_stop() - LEAD_ECHO_RING).abs() < 1e-9);
    }

    #[test]
    fn jitter_offset_delays_the_voice() {
        let (mut b, bus, noise) = setup();
        let mut r = req(VoiceKind::HiHat { open: false });
        r.offset = 0.015;
        let v = build(&mut b, &r, 1.0, &bus, &noise).unwrap();
        assert_eq!(b.node(v.sources()[0]).unwrap().start, Some(1.015));
    }

    #[test]
    fn failed_build_releases_what_it_made() {
        let (mut b, mut bus, noise) = setup();
        let live = b.live_nodes();
        bus.sidechain = NodeId(999); // every node gets created, the final connect fails
        let kind = VoiceKind::Bass { freq: 65.0, cutoff: 900.0, length: 0.2 };
        assert!(build(&mut b, &req(kind), 0.0, &bus, &noise).is_err());
        assert_eq!(b.live_nodes(), live);

        b.reject_next_creates(1);
        assert!(build(&mut b, &req(VoiceKind::Kick), 0.0, &bus, &noise).is_err());
        assert_eq!(b.live_nodes(), live);
    }

    #[test]
    fn release_is_idempotent() {
        let (mut b, bus, noise) = setup();
        let mut v = build(&mut b, &req(VoiceKind::Snare), 0.0, &bus, &noise).unwrap();
        assert!(v.release(&mut b));
        assert!(!v.release(&mut b));
        for &n in v.nodes() {
            assert_eq!(b.node(n).unwrap().disconnects, 1);
        }
    }

    #[test]
    fn arena_releases_on_either_path_exactly_once() {
        let (mut b, bus, noise) = setup();
        let mut arena = VoiceArena::new();
        let v = build(&mut b, &req(VoiceKind::Kick), 0.0, &bus, &noise).unwrap();
        let src = v.sources()[0];
        let nodes = v.nodes().to_vec();
        arena.insert(v);
        assert_eq!(arena.len(), 1);

        assert!(arena.source_ended(&mut b, src));
        assert!(!arena.source_ended(&mut b, src));
        assert_eq!(arena.reap(&mut b, 100.0, 0.1), 0);
        assert!(arena.is_empty());
        for n in nodes {
            assert_eq!(b.node(n).unwrap().disconnects, 1);
        }
    }

    #[test]
    fn reaper_waits_for_the_release_tail() {
        let (mut b, bus, noise) = setup();
        let mut arena = VoiceArena::new();
        arena.insert(build(&mut b, &req(VoiceKind::Kick), 0.0, &bus, &noise).unwrap());
        assert_eq!(arena.reap(&mut b, 0.55, 0.1), 0);
        assert_eq!(arena.reap(&mut b, 0.6, 0.1), 1);
        assert!(arena.last_stop().is_none());
    }

    #[test]
    fn echoing_voices_ignore_the_ended_signal() {
        let (mut b, bus, noise) = setup();
        let mut arena = VoiceArena::new();
        let kind = VoiceKind::Lead { freq: 440.0, waveform: Waveform::Square, length: 0.1 };
        let v = build(&mut b, &req(kind), 0.0, &bus, &noise).unwrap();
        let src = v.sources()[0];
        let stop = v.stop_at();
        arena.insert(v);
        assert!(!arena.source_ended(&mut b, src));
        assert_eq!(arena.reap(&mut b, stop + 0.05, 0.1), 0);
        assert_eq!(arena.reap(&mut b, stop + 0.1, 0.1), 1);
    }

    #[test]
    fn slots_are_reused() {
        let (mut b, bus, noise) = setup();
        let mut arena = VoiceArena::new();
        let first = arena.insert(build(&mut b, &req(VoiceKind::Kick), 0.0, &bus, &noise).unwrap());
        arena.release_all(&mut b);
        let second = arena.insert(build(&mut b, &req(VoiceKind::Kick), 1.0, &bus, &noise).unwrap());
        assert_eq!(first, second);
        assert_eq!(arena.get(second).unwrap().stop_at(), 1.5);
    }
}
