// ============================================================================
// ANALYSIS - Shared Analysis State And Backend Interface
// ============================================================================
//
// The store holds every loaded signal record, the motifs found in them and
// the trained classifier. Workers reach it through Arc<RwLock<_>>; the
// control thread only reads it outside of task cleanups.
//
// The heavy lifting (loading, features, training) sits behind the
// AnalysisBackend trait so the session never depends on one algorithm.
// ============================================================================

pub mod basic;
pub mod classifier;
pub mod features;

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};
use crate::navigation::Span;

pub use basic::BasicBackend;
pub use classifier::Classifier;
pub use features::FeatureSet;

/// Parameters for loading and feature extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisParams {
    /// Keep every n-th sample on load
    pub downsampling: usize,
    /// Longer signals are split into records of at most this length
    pub split_seconds: f64,
    pub frame_ms: f64,
    pub frame_step_ms: f64,
    pub bands: usize,
    /// Shortest run of equally labelled frames reported as a motif
    pub min_motif_frames: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            downsampling: 1,
            split_seconds: 600.0,
            frame_ms: 20.0,
            frame_step_ms: 10.0,
            bands: 16,
            min_motif_frames: 5,
        }
    }
}

/// One contiguous stretch of signal with its framewise features and labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalRecord {
    pub name: String,
    pub sample_rate: u32,
    /// Start of this record within its source, in seconds
    pub offset_seconds: f64,
    pub samples: Vec<f32>,
    /// Centre time of every frame, ascending
    pub time: Vec<f64>,
    /// Class of every frame; 0 means unlabelled
    pub classification: Vec<u32>,
    pub features: FeatureSet,
}

impl SignalRecord {
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Time range covered by the record.
    pub fn domain(&self) -> Span {
        Span::new(self.offset_seconds, self.offset_seconds + self.duration())
    }

    /// Frequency range of the spectrogram.
    pub fn range(&self) -> Span {
        Span::new(0.0, self.features.freq_max as f64)
    }

    pub fn frame_count(&self) -> usize {
        self.time.len()
    }

    /// Index of the first frame at or after `t`.
    pub fn frame_index(&self, t: f64) -> usize {
        self.time.partition_point(|&frame| frame < t)
    }

    /// Assign `label` to every frame inside `span`. Returns the frame count.
    pub fn label_span(&mut self, span: Span, label: u32) -> usize {
        let frames = self.classification.len();
        let start = self.frame_index(span.lo).min(frames);
        let end = self.frame_index(span.hi).clamp(start, frames);
        for class in &mut self.classification[start..end] {
            *class = label;
        }
        end - start
    }

    /// Every per-frame table must have one entry per frame time.
    pub fn check_shape(&self) -> anyhow::Result<()> {
        let frames = self.time.len();
        let features = &self.features;
        let tables = [
            ("classification", self.classification.len(), frames),
            ("power", features.power_db.len(), frames),
            ("entropy", features.entropy.len(), frames),
            ("band energy", features.band_db.len(), frames * features.bands),
            ("spectrogram", features.spectrogram.len(), frames * features.rows),
        ];
        for (table, len, expected) in tables {
            anyhow::ensure!(
                len == expected,
                "record '{}': {} has {} entries, expected {} for {} frames",
                self.name,
                table,
                len,
                expected,
                frames
            );
        }
        anyhow::ensure!(
            self.time.windows(2).all(|w| w[0] <= w[1]),
            "record '{}': frame times are not ascending",
            self.name
        );
        Ok(())
    }

    pub fn is_labelled(&self) -> bool {
        self.classification.iter().any(|&c| c != 0)
    }

    pub fn max_class(&self) -> u32 {
        self.classification.iter().copied().max().unwrap_or(0)
    }
}

/// A run of frames sharing one class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotifRecord {
    /// Index of the record in the store
    pub record: usize,
    pub label: u32,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Default)]
pub struct AnalysisStore {
    pub songs: Vec<SignalRecord>,
    pub motifs: Vec<MotifRecord>,
    pub classifier: Option<Classifier>,
    active: Option<usize>,
}

impl AnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&mut self, index: usize) -> SessionResult<()> {
        if index >= self.songs.len() {
            return Err(SessionError::NoSuchRecord(index));
        }
        self.active = Some(index);
        Ok(())
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_record(&self) -> Option<&SignalRecord> {
        self.active.and_then(|i| self.songs.get(i))
    }

    pub fn active_record_mut(&mut self) -> Option<&mut SignalRecord> {
        self.active.and_then(|i| self.songs.get_mut(i))
    }

    /// Append records; returns the index of the first one added.
    pub fn extend(&mut self, records: Vec<SignalRecord>) -> usize {
        let first = self.songs.len();
        self.songs.extend(records);
        first
    }

    /// Replace everything with a restored session.
    pub fn replace(&mut self, records: Vec<SignalRecord>, motifs: Vec<MotifRecord>) {
        self.songs = records;
        self.motifs = motifs;
        self.active = None;
    }
}

/// The store as shared between the control thread and workers.
pub type SharedStore = Arc<RwLock<AnalysisStore>>;

pub fn shared_store() -> SharedStore {
    Arc::new(RwLock::new(AnalysisStore::new()))
}

/// Read access. A worker that panicked mid-write leaves the data as it was;
/// the lock is not treated as fatal.
pub fn read(store: &RwLock<AnalysisStore>) -> RwLockReadGuard<'_, AnalysisStore> {
    store.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write(store: &RwLock<AnalysisStore>) -> RwLockWriteGuard<'_, AnalysisStore> {
    store.write().unwrap_or_else(PoisonError::into_inner)
}

/// Long-running analysis operations. Every method runs on a worker thread.
pub trait AnalysisBackend: Send + Sync {
    /// Read a signal file into one or more records.
    fn load(&self, path: &Path, params: &AnalysisParams) -> anyhow::Result<Vec<SignalRecord>>;

    /// A generated signal with known labels, for trying things out.
    fn synthesize(
        &self,
        seconds: f64,
        seed: u64,
        params: &AnalysisParams,
    ) -> anyhow::Result<Vec<SignalRecord>>;

    fn train(&self, records: &[SignalRecord]) -> anyhow::Result<Classifier>;

    /// Class of every frame of `record`.
    fn classify(&self, classifier: &Classifier, record: &SignalRecord) -> anyhow::Result<Vec<u32>>;

    fn find_motifs(
        &self,
        record_index: usize,
        record: &SignalRecord,
        params: &AnalysisParams,
    ) -> anyhow::Result<Vec<MotifRecord>>;

    fn save_classifier(&self, classifier: &Classifier, path: &Path) -> anyhow::Result<()>;
    fn load_classifier(&self, path: &Path) -> anyhow::Result<Classifier>;

    fn save_records(
        &self,
        records: &[SignalRecord],
        motifs: &[MotifRecord],
        path: &Path,
    ) -> anyhow::Result<()>;
    fn load_records(&self, path: &Path) -> anyhow::Result<(Vec<SignalRecord>, Vec<MotifRecord>)>;
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn record_with_frames(times: &[f64]) -> SignalRecord {
        SignalRecord {
            name: "test".to_string(),
            sample_rate: 100,
            offset_seconds: 0.0,
            samples: vec![0.0; 1000],
            time: times.to_vec(),
            classification: vec![0; times.len()],
            features: FeatureSet::default(),
        }
    }

    #[test]
    fn label_span_uses_sorted_search() {
        let times: Vec<f64> = (0..10).map(|i| i as f64 + 0.5).collect();
        let mut record = record_with_frames(&times);
        let count = record.label_span(Span::new(2.0, 5.0), 3);
        assert_eq!(count, 3);
        assert_eq!(record.classification, vec![0, 0, 3, 3, 3, 0, 0, 0, 0, 0]);
        assert!(record.is_labelled());
        assert_eq!(record.max_class(), 3);
    }

    #[test]
    fn label_span_stays_inside_a_short_classification() {
        let times: Vec<f64> = (0..10).map(|i| i as f64 + 0.5).collect();
        let mut record = record_with_frames(&times);
        record.classification.truncate(3);
        assert_eq!(record.label_span(Span::new(1.0, 8.0), 2), 2);
        assert_eq!(record.classification, vec![0, 2, 2]);
        assert_eq!(record.label_span(Span::new(5.0, 8.0), 2), 0);
    }

    #[test]
    fn check_shape_catches_mismatched_tables() {
        let mut record = record_with_frames(&[0.5, 1.5]);
        record.features.power_db = vec![-40.0; 2];
        record.features.entropy = vec![0.5; 2];
        assert!(record.check_shape().is_ok());

        record.classification.pop();
        let err = record.check_shape().unwrap_err();
        assert!(err.to_string().contains("classification has 1 entries"), "{}", err);
    }

    #[test]
    fn label_span_outside_frames() {
        let mut record = record_with_frames(&[0.5, 1.5]);
        assert_eq!(record.label_span(Span::new(5.0, 6.0), 1), 0);
        assert!(!record.is_labelled());
    }

    #[test]
    fn store_active_record() {
        let mut store = AnalysisStore::new();
        assert!(store.active_record().is_none());
        assert!(matches!(store.set_active(0), Err(SessionError::NoSuchRecord(0))));

        let first = store.extend(vec![record_with_frames(&[0.5]), record_with_frames(&[0.5])]);
        assert_eq!(first, 0);
        let next = store.extend(vec![record_with_frames(&[0.5])]);
        assert_eq!(next, 2);
        store.set_active(next).unwrap();
        assert_eq!(store.active_index(), Some(2));
        assert!(store.active_record().is_some());
    }

    #[test]
    fn record_domain() {
        let mut record = record_with_frames(&[0.5]);
        record.offset_seconds = 600.0;
        assert_eq!(record.domain(), Span::new(600.0, 610.0));
    }
}
