use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::audio_api::CompressorSettings;

const BLOCK: usize = 512; // convolution partition size, also its latency

/// Uniformly partitioned FFT convolution (overlap-save).
///
/// The impulse is cut into `BLOCK`-sized partitions whose spectra are kept;
/// every full input block is transformed once and pushed onto a frequency
/// domain delay line, and each output block is the sum over partitions of
/// delayed input spectrum times partition spectrum.
pub struct Convolver {
    partitions: Vec<Vec<Complex<f32>>>,
    history: Vec<Vec<Complex<f32>>>, // input spectra, newest at `head`
    head: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
    window: Vec<f32>, // previous block followed by current block
    input: Vec<f32>,
    output: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    acc: Vec<Complex<f32>>,
    pos: usize,
}

impl Convolver {
    pub fn new(impulse: &[f32]) -> Self {
        let n = 2 * BLOCK;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);
        let ifft = planner.plan_fft_inverse(n);
        let scratch_len = fft.get_inplace_scratch_len().max(ifft.get_inplace_scratch_len());
        let mut scratch = vec![Complex::new(0.0, 0.0); scratch_len];

        let mut partitions: Vec<Vec<Complex<f32>>> = impulse
            .chunks(BLOCK)
            .map(|chunk| {
                let mut spec = vec![Complex::new(0.0, 0.0); n];
                for (dst, &x) in spec.iter_mut().zip(chunk) {
                    dst.re = x;
                }
                fft.process_with_scratch(&mut spec, &mut scratch);
                spec
            })
            .collect();
        if partitions.is_empty() {
            partitions.push(vec![Complex::new(0.0, 0.0); n]); // silent
        }
        let count = partitions.len();

        Self {
            partitions,
            history: vec![vec![Complex::new(0.0, 0.0); n]; count],
            head: 0,
            fft,
            ifft,
            scratch,
            window: vec![0.0; n],
            input: vec![0.0; BLOCK],
            output: vec![0.0; BLOCK],
            spectrum: vec![Complex::new(0.0, 0.0); n],
            acc: vec![Complex::new(0.0, 0.0); n],
            pos: 0,
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.output[self.pos];
        self.input[self.pos] = x;
        self.pos += 1;
        if self.pos == BLOCK {
            self.run_block();
            self.pos = 0;
        }
        y
    }

    fn run_block(&mut self) {
        let n = 2 * BLOCK;
        self.window.copy_within(BLOCK.., 0);
        self.window[BLOCK..].copy_from_slice(&self.input);

        for (dst, &x) in self.spectrum.iter_mut().zip(&self.window) {
            *dst = Complex::new(x, 0.0);
        }
        self.fft.process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let count = self.partitions.len();
        self.head = (self.head + count - 1) % count;
        self.history[self.head].copy_from_slice(&self.spectrum);

        self.acc.fill(Complex::new(0.0, 0.0));
        for (p, h) in self.partitions.iter().enumerate() {
            let x = &self.history[(self.head + p) % count];
            for ((a, xi), hi) in self.acc.iter_mut().zip(x).zip(h) {
                *a += xi * hi;
            }
        }
        self.ifft.process_with_scratch(&mut self.acc, &mut self.scratch);

        // only the second half of the circular result is alias-free
        let scale = 1.0 / n as f32;
        for (dst, src) in self.output.iter_mut().zip(&self.acc[BLOCK..]) {
            *dst = src.re * scale;
        }
    }
}

/// Soft-knee feed-forward compressor with attack/release smoothing of the
/// gain reduction.
pub struct Compressor {
    threshold: f32,
    knee: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    reduction_db: f32, // <= 0
}

impl Compressor {
    pub fn new(settings: CompressorSettings, sample_rate: f32) -> Self {
        let coeff = |secs: f64| {
            if secs <= 0.0 { 0.0 } else { (-1.0 / (secs as f32 * sample_rate)).exp() }
        };
        Self {
            threshold: settings.threshold as f32,
            knee: settings.knee.max(0.0) as f32,
            ratio: settings.ratio.max(1.0) as f32,
            attack_coeff: coeff(settings.attack),
            release_coeff: coeff(settings.release),
            reduction_db: 0.0,
        }
    }

    fn target_reduction(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold;
        let slope = 1.0 / self.ratio - 1.0;
        if self.knee > 0.0 && 2.0 * over.abs() <= self.knee {
            slope * (over + self.knee / 2.0).powi(2) / (2.0 * self.knee)
        } else if over > 0.0 {
            slope * over
        } else {
            0.0
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let level_db = 20.0 * x.abs().max(1e-6).log10();
        let target = self.target_reduction(level_db);
        let coeff = if target < self.reduction_db { self.attack_coeff } else { self.release_coeff };
        self.reduction_db = target + coeff * (self.reduction_db - target);
        x * 10f32.powf(self.reduction_db / 20.0)
    }
}
