// ============================================================================
// BASIC.RS - Reference Analysis Backend
// ============================================================================
//
// WAV loading, framewise features, a nearest-centroid classifier, motif
// search over labelled runs and JSON persistence. Good enough to drive the
// session end to end; not a research-grade analyzer.
// ============================================================================

use std::f32::consts::PI;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use hound::{SampleFormat, WavReader};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::navigation::Span;

use super::features::FeatureExtractor;
use super::{AnalysisBackend, AnalysisParams, Classifier, MotifRecord, SignalRecord};

/// Sample rate of generated demo signals
pub const DEMO_SAMPLE_RATE: u32 = 16000;

/// On-disk layout of a saved session
#[derive(Deserialize)]
struct SavedRecords {
    records: Vec<SignalRecord>,
    motifs: Vec<MotifRecord>,
}

#[derive(Serialize)]
struct SavedRecordsRef<'a> {
    records: &'a [SignalRecord],
    motifs: &'a [MotifRecord],
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicBackend;

impl BasicBackend {
    pub fn new() -> Self {
        Self
    }

    /// Split `samples` into records of at most `split_seconds` and compute
    /// the features of each.
    pub fn build_records(
        &self,
        name: &str,
        samples: &[f32],
        sample_rate: u32,
        params: &AnalysisParams,
    ) -> Result<Vec<SignalRecord>> {
        if sample_rate == 0 {
            bail!("'{}' has a sample rate of zero", name);
        }
        if samples.is_empty() {
            bail!("'{}' contains no samples", name);
        }
        let extractor = FeatureExtractor::new(sample_rate, params);
        let chunk_len = ((params.split_seconds * sample_rate as f64) as usize).max(extractor.frame_len());
        let pieces = samples.len().div_ceil(chunk_len);

        let mut records = Vec::with_capacity(pieces);
        for (k, chunk) in samples.chunks(chunk_len).enumerate() {
            let offset_seconds = (k * chunk_len) as f64 / sample_rate as f64;
            let features = extractor.extract(chunk)?;
            let time: Vec<f64> = extractor
                .frame_times(chunk.len())
                .into_iter()
                .map(|t| t + offset_seconds)
                .collect();
            let record_name = if pieces > 1 {
                format!("{} [{}/{}]", name, k + 1, pieces)
            } else {
                name.to_string()
            };
            records.push(SignalRecord {
                name: record_name,
                sample_rate,
                offset_seconds,
                samples: chunk.to_vec(),
                classification: vec![0; time.len()],
                time,
                features,
            });
        }
        Ok(records)
    }
}

impl AnalysisBackend for BasicBackend {
    fn load(&self, path: &Path, params: &AnalysisParams) -> Result<Vec<SignalRecord>> {
        let (samples, sample_rate) = read_wav_mono(path)?;
        let step = params.downsampling.max(1);
        let (samples, sample_rate) = if step > 1 {
            (samples.into_iter().step_by(step).collect::<Vec<f32>>(), sample_rate / step as u32)
        } else {
            (samples, sample_rate)
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.build_records(&name, &samples, sample_rate, params)
    }

    fn synthesize(&self, seconds: f64, seed: u64, params: &AnalysisParams) -> Result<Vec<SignalRecord>> {
        let sr = DEMO_SAMPLE_RATE;
        let (samples, events) = demo_signal(seconds, seed, sr);
        let mut records = self.build_records("demo", &samples, sr, params)?;
        // Ground-truth labels for every generated syllable
        for record in &mut records {
            for &(start, end, class) in &events {
                record.label_span(Span::new(start, end), class);
            }
        }
        Ok(records)
    }

    fn train(&self, records: &[SignalRecord]) -> Result<Classifier> {
        Classifier::train(records)
    }

    fn classify(&self, classifier: &Classifier, record: &SignalRecord) -> Result<Vec<u32>> {
        classifier.classify(record)
    }

    fn find_motifs(
        &self,
        record_index: usize,
        record: &SignalRecord,
        params: &AnalysisParams,
    ) -> Result<Vec<MotifRecord>> {
        let min_frames = params.min_motif_frames.max(1);
        let mut motifs = Vec::new();
        let mut run_start = 0;
        for i in 1..=record.classification.len() {
            let run_ended = i == record.classification.len()
                || record.classification[i] != record.classification[run_start];
            if !run_ended {
                continue;
            }
            let label = record.classification[run_start];
            if label != 0 && i - run_start >= min_frames {
                let half_hop = params.frame_step_ms / 2000.0;
                motifs.push(MotifRecord {
                    record: record_index,
                    label,
                    start: record.time[run_start] - half_hop,
                    end: record.time[i - 1] + half_hop,
                });
            }
            run_start = i;
        }
        Ok(motifs)
    }

    fn save_classifier(&self, classifier: &Classifier, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(classifier).context("Failed to encode classifier")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn load_classifier(&self, path: &Path) -> Result<Classifier> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("{} is not a saved classifier", path.display()))
    }

    fn save_records(&self, records: &[SignalRecord], motifs: &[MotifRecord], path: &Path) -> Result<()> {
        let saved = SavedRecordsRef { records, motifs };
        let json = serde_json::to_string(&saved).context("Failed to encode records")?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn load_records(&self, path: &Path) -> Result<(Vec<SignalRecord>, Vec<MotifRecord>)> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let saved: SavedRecords = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a saved record set", path.display()))?;
        for record in &saved.records {
            record
                .check_shape()
                .with_context(|| format!("{} holds a damaged record", path.display()))?;
        }
        if let Some(motif) = saved.motifs.iter().find(|m| m.record >= saved.records.len()) {
            bail!(
                "{}: motif refers to record {} but only {} were saved",
                path.display(),
                motif.record,
                saved.records.len()
            );
        }
        Ok((saved.records, saved.motifs))
    }
}

/// Read a WAV file as mono f32, averaging channels.
fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {:?}", path))?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .context("Failed to read float samples")?,
        SampleFormat::Int => {
            let scale = match spec.bits_per_sample {
                8 => 128.0,
                16 => i16::MAX as f32,
                24 => 8388608.0, // 2^23
                32 => i32::MAX as f32,
                bits => bail!("Unsupported bit depth: {}", bits),
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<f32>, _>>()
                .context("Failed to read integer samples")?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

/// Noise floor with three kinds of syllables dropped in at random. Returns
/// the samples and every syllable as (start s, end s, class).
fn demo_signal(seconds: f64, seed: u64, sample_rate: u32) -> (Vec<f32>, Vec<(f64, f64, u32)>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let len = (seconds.max(0.5) * sample_rate as f64) as usize;
    let mut samples: Vec<f32> = (0..len).map(|_| rng.random_range(-0.01..0.01)).collect();
    let mut events = Vec::new();

    let mut t = rng.random_range(0.1..0.4);
    while t < seconds - 0.3 {
        let duration = rng.random_range(0.08..0.25);
        let class: u32 = rng.random_range(1..=3);
        let start = (t * sample_rate as f64) as usize;
        let end = (((t + duration) * sample_rate as f64) as usize).min(len);
        for (n, sample) in samples[start..end].iter_mut().enumerate() {
            let local = n as f32 / sample_rate as f32;
            let fraction = n as f32 / (end - start).max(1) as f32;
            let envelope = (PI * fraction).sin();
            let value = match class {
                // steady whistle
                1 => (2.0 * PI * 1200.0 * local).sin(),
                // upward sweep
                2 => (2.0 * PI * (2500.0 + 2000.0 * fraction) * local).sin(),
                // buzzy harmonic stack
                _ => (1..=4)
                    .map(|h| (2.0 * PI * 400.0 * h as f32 * local).sin() / h as f32)
                    .sum::<f32>(),
            };
            *sample += 0.4 * envelope * value;
        }
        events.push((t, t + duration, class));
        t += duration + rng.random_range(0.15..0.6);
    }
    (samples, events)
}

// ============================================================================
// UNIT TESTS
// ============================================================================
