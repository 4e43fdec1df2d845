use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::Result;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use super::AnalysisParams;

/// Frequency rows kept for the spectrogram display
pub const SPECTROGRAM_ROWS: usize = 64;

const FLOOR: f32 = 1e-12;

/// Framewise features of one record. Per-frame tables are frame-major.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureSet {
    /// Frame power in dB
    pub power_db: Vec<f32>,
    /// Normalised spectral entropy, 0 (pure tone) to 1 (white noise)
    pub entropy: Vec<f32>,
    pub bands: usize,
    /// `bands` energies per frame in dB, equal-width bands up to Nyquist
    pub band_db: Vec<f32>,
    pub rows: usize,
    /// `rows` spectrogram cells per frame in dB, row 0 at 0 Hz
    pub spectrogram: Vec<f32>,
    pub freq_max: f32,
}

impl FeatureSet {
    pub fn frame_bands(&self, frame: usize) -> &[f32] {
        let start = frame * self.bands;
        self.band_db.get(start..start + self.bands).unwrap_or(&[])
    }

    pub fn frames(&self) -> usize {
        self.power_db.len()
    }
}

pub struct FeatureExtractor {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    window_power: f32,
    frame_len: usize,
    hop: usize,
    sample_rate: u32,
    bands: usize,
}

impl FeatureExtractor {
    pub fn new(sample_rate: u32, params: &AnalysisParams) -> Self {
        let frame_len = ((params.frame_ms / 1000.0 * sample_rate as f64).round() as usize).max(8);
        let hop = ((params.frame_step_ms / 1000.0 * sample_rate as f64).round() as usize).max(1);
        let n_fft = frame_len.next_power_of_two();

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        // Hann window over the frame, zero padded up to the FFT length
        let mut window = vec![0.0; n_fft];
        for (i, w) in window.iter_mut().take(frame_len).enumerate() {
            *w = 0.5 * (1.0 - ((2.0 * PI * i as f32) / (frame_len - 1) as f32).cos());
        }
        let window_power = window.iter().map(|w| w * w).sum::<f32>().max(FLOOR);

        Self {
            fft,
            window,
            window_power,
            frame_len,
            hop,
            sample_rate,
            bands: params.bands.max(1),
        }
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Centre times (relative to the first sample) of the frames `extract`
    /// produces for `len` samples.
    pub fn frame_times(&self, len: usize) -> Vec<f64> {
        (0..self.frame_count(len))
            .map(|i| (i * self.hop + self.frame_len / 2) as f64 / self.sample_rate as f64)
            .collect()
    }

    pub fn frame_count(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else if len <= self.frame_len {
            1
        } else {
            (len - self.frame_len) / self.hop + 1
        }
    }

    pub fn extract(&self, samples: &[f32]) -> Result<FeatureSet> {
        let frames = self.frame_count(samples.len());
        let n_fft = self.window.len();
        let bins = n_fft / 2 + 1;

        let mut out = FeatureSet {
            power_db: Vec::with_capacity(frames),
            entropy: Vec::with_capacity(frames),
            bands: self.bands,
            band_db: Vec::with_capacity(frames * self.bands),
            rows: SPECTROGRAM_ROWS,
            spectrogram: Vec::with_capacity(frames * SPECTROGRAM_ROWS),
            freq_max: self.sample_rate as f32 / 2.0,
        };

        let mut indata = vec![0.0f32; n_fft];
        let mut spectrum = self.fft.make_output_vec();
        let mut power = vec![0.0f32; bins];

        for frame in 0..frames {
            let start = frame * self.hop;
            let end = (start + self.frame_len).min(samples.len());
            let chunk = &samples[start..end];

            indata.fill(0.0);
            for (i, &s) in chunk.iter().enumerate() {
                indata[i] = s * self.window[i];
            }
            self.fft
                .process(&mut indata, &mut spectrum)
                .map_err(|e| anyhow::anyhow!("FFT processing failed: {}", e))?;

            for (p, c) in power.iter_mut().zip(spectrum.iter()) {
                *p = c.norm_sqr() / self.window_power;
            }

            let mean_square = chunk.iter().map(|s| s * s).sum::<f32>() / self.frame_len as f32;
            out.power_db.push(to_db(mean_square));
            out.entropy.push(spectral_entropy(&power));
            push_grouped(&mut out.band_db, &power, self.bands);
            push_grouped(&mut out.spectrogram, &power, SPECTROGRAM_ROWS);
        }

        Ok(out)
    }
}

fn to_db(power: f32) -> f32 {
    10.0 * (power + FLOOR).log10()
}

fn spectral_entropy(power: &[f32]) -> f32 {
    let total: f32 = power.iter().sum();
    if total <= FLOOR || power.len() < 2 {
        return 0.0;
    }
    let h: f32 = power
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| {
            let q = p / total;
            -q * q.log2()
        })
        .sum();
    (h / (power.len() as f32).log2()).clamp(0.0, 1.0)
}

/// Sum `power` into `groups` equal-width groups and append them in dB.
fn push_grouped(out: &mut Vec<f32>, power: &[f32], groups: usize) {
    let bins = power.len();
    for g in 0..groups {
        let lo = g * bins / groups;
        let hi = ((g + 1) * bins / groups).max(lo + 1).min(bins);
        let sum: f32 = power.get(lo..hi).map(|s| s.iter().sum()).unwrap_or(0.0);
        out.push(to_db(sum));
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn frame_layout() {
        let extractor = FeatureExtractor::new(8000, &AnalysisParams::default());
        assert_eq!(extractor.frame_len(), 160);
        assert_eq!(extractor.hop(), 80);
        assert_eq!(extractor.frame_count(0), 0);
        assert_eq!(extractor.frame_count(100), 1);
        assert_eq!(extractor.frame_count(8000), 99);
        let times = extractor.frame_times(8000);
        assert!((times[0] - 0.01).abs() < 1e-9);
    }

    #[test]
    fn tone_energy_lands_in_its_band() {
        let params = AnalysisParams { bands: 4, ..AnalysisParams::default() };
        let extractor = FeatureExtractor::new(8000, &params);
        // 500 Hz sits in the lowest of four 1 kHz bands
        let features = extractor.extract(&tone(500.0, 8000, 0.5)).unwrap();
        assert_eq!(features.frames(), extractor.frame_count(4000));
        let bands = features.frame_bands(3);
        assert_eq!(bands.len(), 4);
        assert!(bands[0] > bands[2] + 20.0);
        assert_eq!(features.spectrogram.len(), features.frames() * SPECTROGRAM_ROWS);
    }

    #[test]
    fn entropy_separates_tone_from_noise() {
        use rand::{Rng, SeedableRng, rngs::StdRng};
        let extractor = FeatureExtractor::new(8000, &AnalysisParams::default());
        let mut rng = StdRng::seed_from_u64(7);
        let noise: Vec<f32> = (0..4000).map(|_| rng.random_range(-0.5..0.5)).collect();

        let tone_features = extractor.extract(&tone(1000.0, 8000, 0.5)).unwrap();
        let noise_features = extractor.extract(&noise).unwrap();
        assert!(tone_features.entropy[5] < noise_features.entropy[5]);
        assert!(noise_features.entropy[5] > 0.7);
    }

    #[test]
    fn silence_is_floor() {
        let extractor = FeatureExtractor::new(8000, &AnalysisParams::default());
        let features = extractor.extract(&vec![0.0; 1000]).unwrap();
        assert!(features.power_db.iter().all(|&p| p <= -100.0));
        assert!(features.entropy.iter().all(|&e| e == 0.0));
    }
}
