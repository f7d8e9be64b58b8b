use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::frame::StereoFrame;

#[derive(Clone, Debug)]
pub struct SampleBuffer {
    pub data: Vec<StereoFrame>, // the audio data array
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self { data: Vec::new(), sample_rate }
    }

    // Load a WAV file from disk (used for custom reverb impulses)
    pub fn load_wav(path: &Path, target_rate: u32) -> anyhow::Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader // float, just pass it through
                .samples::<f32>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => { // int, convert to float
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|x| x as f32 / max))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let mut frames: Vec<StereoFrame> = if spec.channels == 1 {
            samples.into_iter().map(StereoFrame::mono).collect()
        } else {
            samples
                .chunks_exact(spec.channels as usize)
                .map(|c| StereoFrame { left: c[0], right: c[1] })
                .collect()
        };

        if spec.sample_rate != target_rate {
            frames = resample_linear(&frames, spec.sample_rate, target_rate);
        }

        Ok(Self { data: frames, sample_rate: target_rate })
    }

    pub fn to_mono(&self) -> Arc<[f32]> {
        self.data.iter().map(|f| 0.5 * (f.left + f.right)).collect()
    }

    pub fn peak(&self) -> f32 {
        self.data.iter().map(StereoFrame::peak).fold(0.0, f32::max)
    }

    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.sample_rate as f64
    }

    pub fn write_wav(&self, path: &Path) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("failed to create {}", path.display()))?;
        for f in &self.data {
            writer.write_sample(to_i16(f.left))?;
            writer.write_sample(to_i16(f.right))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

fn to_i16(x: f32) -> i16 {
    (x.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

// White noise shared by every noise voice; sources loop it.
pub fn white_noise(len: usize, seed: u64) -> Arc<[f32]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

// Synthetic room: noise under an exponential decay, normalized so the
// reverb return sits near unity gain.
pub fn impulse_response(sample_rate: u32, seconds: f64, decay: f64, seed: u64) -> Arc<[f32]> {
    let len = ((sample_rate as f64 * seconds) as usize).max(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ir: Vec<f32> = (0..len)
        .map(|i| {
            let t = i as f64 / len as f64;
            let env = (1.0 - t).powf(decay) as f32;
            rng.gen_range(-1.0f32..1.0) * env
        })
        .collect();
    let energy: f32 = ir.iter().map(|x| x * x).sum::<f32>().sqrt();
    if energy > 0.0 {
        for x in ir.iter_mut() {
            *x /= energy;
        }
    }
    ir.into()
}

fn resample_linear(frames: &[StereoFrame], source_rate: u32, target_rate: u32) -> Vec<StereoFrame> {
    if source_rate == target_rate {
        return frames.to_vec();
    }
    let ratio = target_rate as f64 / source_rate as f64;
    let out_len = (frames.len() as f64 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        // fractional position in the source buffer
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;
        if idx >= frames.len().saturating_sub(1) { // edge case
            out.push(frames.last().copied().unwrap_or_default());
        } else {
            let a = frames[idx];
            let b = frames[idx + 1];
            out.push(StereoFrame { // blend via frac and linear interpolation
                left: a.left * (1.0 - frac) + b.left * frac,
                right: a.right * (1.0 - frac) + b.right * frac,
            });
        }
    }
    out
}
