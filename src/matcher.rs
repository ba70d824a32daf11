use crate::{store::EmbeddingStore, Embedding};
use facegate_vision::face;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-frame identity verdict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameLabel {
    /// No usable face this frame (none, several, or extraction failed).
    NoFace,
    /// A face whose closest identity is beyond the threshold.
    Unknown,
    Identified(String),
}

impl fmt::Display for FrameLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameLabel::NoFace => f.write_str("Scanning..."),
            FrameLabel::Unknown => f.write_str("Unknown"),
            FrameLabel::Identified(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub label: FrameLabel,
    pub distance: f32,
}

impl MatchResult {
    pub fn no_face() -> Self {
        Self {
            label: FrameLabel::NoFace,
            distance: f32::MAX,
        }
    }

    pub fn identified(label: impl Into<String>, distance: f32) -> Self {
        Self {
            label: FrameLabel::Identified(label.into()),
            distance,
        }
    }
}

/// Closest enrolled identity and its distance, ignoring the threshold.
///
/// Entries with a different dimension and degenerate entries are skipped.
/// Ties keep the first minimum, which is the lexicographically smallest
/// label because the store iterates in label order.
pub fn nearest<'a>(store: &'a EmbeddingStore, probe: &Embedding) -> Option<(&'a str, f32)> {
    store
        .iter()
        .filter(|(_, emb)| !emb.is_degenerate())
        .filter_map(|(label, emb)| face::distance(probe, emb).map(|d| (label, d)))
        .fold(None, |acc, (label, d)| match acc {
            Some((_, best)) if best <= d => acc,
            _ => Some((label, d)),
        })
}

/// Match a normalized probe against the store.
pub fn match_probe(probe: &Embedding, store: &EmbeddingStore, threshold: f32) -> MatchResult {
    if probe.is_degenerate() {
        return MatchResult {
            label: FrameLabel::Unknown,
            distance: f32::MAX,
        };
    }

    match nearest(store, probe) {
        Some((label, distance)) => {
            log::debug!(
                "best match {} at distance {:.4} (threshold {:.4})",
                label,
                distance,
                threshold
            );
            if distance > threshold {
                MatchResult {
                    label: FrameLabel::Unknown,
                    distance,
                }
            } else {
                MatchResult::identified(label, distance)
            }
        }
        None => MatchResult {
            label: FrameLabel::Unknown,
            distance: f32::MAX,
        },
    }
}
