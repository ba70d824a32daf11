use anyhow::Result;
use image::DynamicImage;

use crate::face::{self, Detection, Embedding};

/// Side length of the aligned crop handed to the embedder.
pub const FACE_SIZE: u32 = 112;

/// External face detector.
pub trait FaceDetector {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>>;
}

/// External embedding model. `None` means extraction failed for this crop.
pub trait FaceEmbedder {
    fn embed(&mut self, face: &DynamicImage) -> Option<Embedding>;
}

/// Result of scanning one frame.
#[derive(Debug, Clone, Default)]
pub struct FaceScan {
    /// Normalized probe, present only when exactly one face was found and
    /// its embedding could be extracted.
    pub probe: Option<Embedding>,
    /// Every detection in the frame, kept for the overlay.
    pub detections: Vec<Detection>,
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline<D, E> {
    pub detector: D,
    pub encoder: E,
    pub face_size: u32,
}

impl<D: FaceDetector, E: FaceEmbedder> Pipeline<D, E> {
    pub fn new(detector: D, encoder: E) -> Self {
        Self {
            detector,
            encoder,
            face_size: FACE_SIZE,
        }
    }

    /// Scan a frame. Zero or several faces, a failed alignment or a failed
    /// extraction all yield a scan without probe; none of them is an error.
    pub fn scan(&mut self, img: &DynamicImage) -> FaceScan {
        let detections = match self.detector.detect(img) {
            Ok(detections) => detections,
            Err(e) => {
                log::debug!("face detection failed: {:#}", e);
                return FaceScan::default();
            }
        };

        if detections.len() != 1 {
            log::debug!("{} faces in frame, skipping", detections.len());
            return FaceScan {
                probe: None,
                detections,
            };
        }

        let probe = match face::align_face(img, &detections[0], self.face_size) {
            Ok(crop) => self.encoder.embed(&crop).map(Embedding::normalized),
            Err(e) => {
                log::debug!("aligning face failed: {:#}", e);
                None
            }
        };

        FaceScan { probe, detections }
    }
}
