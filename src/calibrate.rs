//! Decision threshold calibration and accuracy self-evaluation over the
//! enrolled set.

use crate::{store::EmbeddingStore, Embedding};
use facegate_vision::face;
use rand::Rng;
use serde::Serialize;

/// Per-component noise amplitude used to estimate intra-identity spread.
pub const NOISE_AMPLITUDE: f32 = 0.01;
pub const MIN_THRESHOLD: f32 = 0.3;
pub const MAX_THRESHOLD: f32 = 1.3;
pub const DEFAULT_THRESHOLD: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub mean_intra: f32,
    pub mean_inter: f32,
    /// Midpoint before the sanity band was applied.
    pub raw: f32,
    pub threshold: f32,
    pub fell_back: bool,
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn noise_distance<R: Rng + ?Sized>(emb: &Embedding, rng: &mut R) -> Option<f32> {
    let mut noisy = emb.clone();
    noisy
        .vector
        .mapv_inplace(|x| x + rng.gen_range(-NOISE_AMPLITUDE..=NOISE_AMPLITUDE));
    face::distance(emb, &noisy)
}

/// Derive the matcher threshold as the midpoint between the mean
/// intra-identity noise distance and the mean inter-identity distance.
pub fn calibrate<R: Rng + ?Sized>(store: &EmbeddingStore, rng: &mut R) -> Calibration {
    let intra: Vec<f32> = store
        .iter()
        .filter_map(|(_, emb)| noise_distance(emb, rng))
        .collect();

    let entries: Vec<&Embedding> = store.iter().map(|(_, emb)| emb).collect();
    let mut inter = Vec::new();
    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            if let Some(d) = face::distance(a, b) {
                inter.push(d);
            }
        }
    }

    let mean_intra = mean(&intra);
    let mean_inter = mean(&inter);
    let raw = (mean_intra + mean_inter) / 2.0;

    let fell_back = !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&raw);
    let threshold = if fell_back { DEFAULT_THRESHOLD } else { raw };

    log::debug!(
        "mean intra = {:.4} | mean inter = {:.4} | computed threshold = {:.4}{}",
        mean_intra,
        mean_inter,
        raw,
        if fell_back { " (out of band, using default)" } else { "" }
    );

    Calibration {
        mean_intra,
        mean_inter,
        raw,
        threshold,
        fell_back,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
    pub percent: f32,
}

/// Classify every ordered pair of enrolled identities (self pairs included)
/// with `threshold` and report how many decisions were right. `None` when
/// fewer than two identities are enrolled.
pub fn evaluate(store: &EmbeddingStore, threshold: f32) -> Option<Accuracy> {
    if store.len() < 2 {
        log::debug!("not enough embeddings to evaluate");
        return None;
    }

    let mut correct = 0;
    let mut total = 0;
    for (name_a, emb_a) in store.iter() {
        for (name_b, emb_b) in store.iter() {
            let Some(d) = face::distance(emb_a, emb_b) else {
                continue;
            };
            let same = name_a == name_b;
            let recognized = d < threshold;
            if recognized == same {
                correct += 1;
            }
            total += 1;
        }
    }

    let percent = correct as f32 / total as f32 * 100.0;
    log::info!(
        "Recognition accuracy: {:.2}% (threshold = {:.3})",
        percent,
        threshold
    );
    Some(Accuracy {
        correct,
        total,
        percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn basis_store(n: usize) -> EmbeddingStore {
        let mut store = EmbeddingStore::new();
        for i in 0..n {
            let mut v = vec![0.0; n.max(2)];
            v[i] = 1.0;
            store.insert(format!("id{}", i), v);
        }
        store
    }

    #[test]
    fn test_orthogonal_identities_calibrate_near_midpoint() {
        let store = basis_store(4);
        let mut rng = StdRng::seed_from_u64(7);
        let cal = calibrate(&store, &mut rng);
        // Orthogonal unit vectors are sqrt(2) apart; noise over 4 components
        // stays below 0.02.
        assert!((cal.mean_inter - 2f32.sqrt()).abs() < 1e-5);
        assert!(cal.mean_intra > 0.0 && cal.mean_intra < 0.02);
        assert!(!cal.fell_back);
        assert!((cal.threshold - (cal.mean_intra + cal.mean_inter) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_identity_falls_back() {
        let store = basis_store(1);
        let mut rng = StdRng::seed_from_u64(1);
        let cal = calibrate(&store, &mut rng);
        assert_eq!(cal.mean_inter, 0.0);
        assert!(cal.fell_back);
        assert_eq!(cal.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_empty_store_falls_back() {
        let mut rng = StdRng::seed_from_u64(2);
        let cal = calibrate(&EmbeddingStore::new(), &mut rng);
        assert_eq!(cal.raw, 0.0);
        assert_eq!(cal.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_threshold_always_in_band() {
        let mut rng = StdRng::seed_from_u64(42);
        for n in 0..6 {
            let cal = calibrate(&basis_store(n), &mut rng);
            assert!((MIN_THRESHOLD..=MAX_THRESHOLD).contains(&cal.threshold));
        }
        let mut near = EmbeddingStore::new();
        near.insert("a", vec![1.0, 0.0]);
        near.insert("b", vec![1.0, 0.01]);
        let cal = calibrate(&near, &mut rng);
        assert!(cal.fell_back);
        assert_eq!(cal.threshold, DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_evaluate_perfect_separation() {
        let store = basis_store(3);
        let acc = evaluate(&store, 0.9).unwrap();
        assert_eq!(acc.total, 9);
        assert_eq!(acc.correct, 9);
        assert!((acc.percent - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_evaluate_loose_threshold_confuses_identities() {
        let store = basis_store(2);
        // sqrt(2) < 2.0, so the two identities are "recognized" as each other.
        let acc = evaluate(&store, 2.0).unwrap();
        assert_eq!(acc.total, 4);
        assert_eq!(acc.correct, 2);
    }

    #[test]
    fn test_evaluate_needs_two_identities() {
        assert!(evaluate(&basis_store(1), 0.9).is_none());
    }
}
