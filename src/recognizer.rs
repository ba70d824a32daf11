use crate::matcher::{self, MatchResult};
use crate::store::EmbeddingStore;
use crate::{Embedding, Pipeline};
use facegate_vision::{FaceDetector, FaceEmbedder};
use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;

/// Overlay annotation for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceOverlay {
    pub bbox: [f32; 4],
    pub distance: f32,
}

/// Everything the controller and the UI need from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub result: MatchResult,
    pub overlays: Vec<FaceOverlay>,
}

impl FrameAnalysis {
    pub fn no_face() -> Self {
        Self {
            result: MatchResult::no_face(),
            overlays: Vec::new(),
        }
    }
}

/// Turns a raw frame into a per-frame verdict. Runs on the frame worker.
pub trait FrameAnalyzer: Send + 'static {
    type Frame: Send + 'static;

    fn analyze(&mut self, frame: Self::Frame) -> FrameAnalysis;
}

/// Camera frames → face pipeline → matcher.
pub struct Recognizer<D, E> {
    pipeline: Pipeline<D, E>,
    store: Arc<EmbeddingStore>,
    threshold: f32,
}

impl<D, E> Recognizer<D, E>
where
    D: FaceDetector,
    E: FaceEmbedder,
{
    pub fn new(pipeline: Pipeline<D, E>, store: Arc<EmbeddingStore>, threshold: f32) -> Self {
        Self {
            pipeline,
            store,
            threshold,
        }
    }

    pub fn recognize(&mut self, img: &DynamicImage) -> FrameAnalysis {
        let scan = self.pipeline.scan(img);
        let result = match &scan.probe {
            Some(probe) => matcher::match_probe(probe, &self.store, self.threshold),
            None => MatchResult::no_face(),
        };

        let overlays = scan
            .detections
            .iter()
            .map(|d| FaceOverlay {
                bbox: d.bbox,
                distance: if scan.detections.len() == 1 {
                    result.distance
                } else {
                    f32::MAX
                },
            })
            .collect();

        FrameAnalysis { result, overlays }
    }
}

impl<D, E> FrameAnalyzer for Recognizer<D, E>
where
    D: FaceDetector + Send + 'static,
    E: FaceEmbedder + Send + 'static,
{
    type Frame = DynamicImage;

    fn analyze(&mut self, frame: DynamicImage) -> FrameAnalysis {
        self.recognize(&frame)
    }
}

/// Frames that already carry their probe (or `None` for "no face").
/// Used by the scripted CLI runner and tests.
pub struct ProbeAnalyzer {
    store: Arc<EmbeddingStore>,
    threshold: f32,
}

impl ProbeAnalyzer {
    pub fn new(store: Arc<EmbeddingStore>, threshold: f32) -> Self {
        Self { store, threshold }
    }
}

impl FrameAnalyzer for ProbeAnalyzer {
    type Frame = Option<Embedding>;

    fn analyze(&mut self, frame: Option<Embedding>) -> FrameAnalysis {
        match frame {
            Some(probe) => FrameAnalysis {
                result: matcher::match_probe(&probe.normalized(), &self.store, self.threshold),
                overlays: Vec::new(),
            },
            None => FrameAnalysis::no_face(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::FrameLabel;
    use crate::Detection;

    struct OneFace;

    impl FaceDetector for OneFace {
        fn detect(&mut self, _img: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
            Ok(vec![Detection::new([2.0, 2.0, 12.0, 12.0], 0.9)])
        }
    }

    struct Fixed(Vec<f32>);

    impl FaceEmbedder for Fixed {
        fn embed(&mut self, _face: &DynamicImage) -> Option<Embedding> {
            Some(Embedding::from_vec(self.0.clone()))
        }
    }

    fn store() -> Arc<EmbeddingStore> {
        let mut store = EmbeddingStore::new();
        store.insert("Alice", vec![1.0, 0.0]);
        Arc::new(store)
    }

    #[test]
    fn test_recognizer_reports_overlay_distance() {
        let pipeline = Pipeline::new(OneFace, Fixed(vec![5.0, 0.0]));
        let mut recognizer = Recognizer::new(pipeline, store(), 0.5);
        let analysis = recognizer.analyze(DynamicImage::new_rgb8(16, 16));
        assert_eq!(analysis.result.label, FrameLabel::Identified("Alice".into()));
        assert_eq!(analysis.overlays.len(), 1);
        assert_eq!(analysis.overlays[0].distance, 0.0);
    }

    #[test]
    fn test_probe_analyzer_without_probe() {
        let mut analyzer = ProbeAnalyzer::new(store(), 0.5);
        assert_eq!(analyzer.analyze(None), FrameAnalysis::no_face());
    }
}
