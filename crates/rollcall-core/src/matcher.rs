//! Probe-to-roster matching.
//!
//! Every probe (one face from the submitted photo) is compared with every
//! reference encoding of every roster student. The closest reference
//! under [`MATCH_THRESHOLD`] wins for that probe. Probes are independent:
//! two probes may land on the same student.

use crate::encoding::Encoding;
use crate::ids::StudentId;
use crate::roster::Roster;
use serde::Serialize;

/// Distances at or above this never match.
pub const MATCH_THRESHOLD: f64 = 0.5;

/// Best match for one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeMatch {
    /// Index of the probe in the input slice.
    pub probe: usize,
    pub student_id: StudentId,
    pub distance: f64,
    /// `1 - distance`; always above `1 - MATCH_THRESHOLD`.
    pub confidence: f64,
}

/// Strategy for assigning probes to roster students.
pub trait Matcher {
    /// Best match for a single probe, if any reference qualifies.
    fn best_match(&self, probe_idx: usize, probe: &Encoding, roster: &Roster) -> Option<ProbeMatch>;

    /// Match every probe independently, in input order.
    fn match_all(&self, probes: &[Encoding], roster: &Roster) -> Vec<ProbeMatch> {
        probes
            .iter()
            .enumerate()
            .filter_map(|(i, probe)| self.best_match(i, probe, roster))
            .collect()
    }
}

/// Euclidean-distance matcher with a strict `<` threshold.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    threshold: f64,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl Matcher for EuclideanMatcher {
    fn best_match(&self, probe_idx: usize, probe: &Encoding, roster: &Roster) -> Option<ProbeMatch> {
        let mut best: Option<StudentId> = None;
        let mut best_distance = f64::INFINITY;

        for entry in roster.iter() {
            for reference in &entry.encodings {
                if reference.len() != probe.len() {
                    tracing::warn!(
                        student_id = %entry.student.id,
                        probe_dim = probe.len(),
                        reference_dim = reference.len(),
                        "skipping reference encoding with mismatched dimension"
                    );
                    continue;
                }
                let distance = probe.euclidean_distance(reference);
                if distance < self.threshold && distance < best_distance {
                    best = Some(entry.student.id);
                    best_distance = distance;
                }
            }
        }

        best.map(|student_id| ProbeMatch {
            probe: probe_idx,
            student_id,
            distance: best_distance,
            confidence: 1.0 - best_distance,
        })
    }
}
