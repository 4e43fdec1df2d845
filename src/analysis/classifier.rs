use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::SignalRecord;

/// Nearest-centroid frame classifier over band energies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classifier {
    pub bands: usize,
    /// Mean band-energy vector of every class seen in training
    pub centroids: BTreeMap<u32, Vec<f32>>,
    /// Frames used per class
    pub support: BTreeMap<u32, usize>,
}

impl Classifier {
    /// Fit on every frame of every record that carries at least one label.
    pub fn train(records: &[SignalRecord]) -> Result<Self> {
        let labelled: Vec<&SignalRecord> = records.iter().filter(|r| r.is_labelled()).collect();
        let Some(first) = labelled.first() else {
            bail!("no labelled records to train on, label a selection first");
        };
        let bands = first.features.bands;

        let mut sums: BTreeMap<u32, (Vec<f64>, usize)> = BTreeMap::new();
        for record in &labelled {
            if record.features.bands != bands {
                bail!(
                    "record '{}' has {} bands, expected {}",
                    record.name,
                    record.features.bands,
                    bands
                );
            }
            for (frame, &class) in record.classification.iter().enumerate() {
                let values = record.features.frame_bands(frame);
                if values.len() != bands {
                    continue;
                }
                let entry = sums.entry(class).or_insert_with(|| (vec![0.0; bands], 0));
                for (acc, &v) in entry.0.iter_mut().zip(values) {
                    *acc += v as f64;
                }
                entry.1 += 1;
            }
        }

        let mut centroids = BTreeMap::new();
        let mut support = BTreeMap::new();
        for (class, (sum, count)) in sums {
            if count == 0 {
                continue;
            }
            centroids.insert(class, sum.iter().map(|s| (s / count as f64) as f32).collect());
            support.insert(class, count);
        }

        Ok(Self { bands, centroids, support })
    }

    pub fn classes(&self) -> impl Iterator<Item = u32> + '_ {
        self.centroids.keys().copied()
    }

    pub fn predict(&self, values: &[f32]) -> u32 {
        let mut best = (0, f32::INFINITY);
        for (&class, centroid) in &self.centroids {
            let d: f32 = centroid
                .iter()
                .zip(values)
                .map(|(c, v)| (c - v) * (c - v))
                .sum();
            if d < best.1 {
                best = (class, d);
            }
        }
        best.0
    }

    pub fn classify(&self, record: &SignalRecord) -> Result<Vec<u32>> {
        if record.features.bands != self.bands {
            bail!(
                "classifier expects {} bands, record '{}' has {}",
                self.bands,
                record.name,
                record.features.bands
            );
        }
        Ok((0..record.frame_count())
            .map(|frame| self.predict(record.features.frame_bands(frame)))
            .collect())
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
