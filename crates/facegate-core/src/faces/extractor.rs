use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{ServiceError, ServiceResult};

/// Face location within the source image, in pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

/// One face found by the extractor: where it is and its fixed-length
/// encoding. Encodings are only meaningful relative to each other via
/// distance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    #[serde(rename = "encoding")]
    pub encoding: Vec<f64>,
}

/// Decodes a base64 image payload into an RGB image.
///
/// Accepts raw base64 as well as data-URL payloads
/// (`data:image/png;base64,<data>`); anything before the first comma is
/// treated as the scheme marker and stripped. Non-RGB images are normalized
/// to RGB.
pub fn decode_image(payload: &str) -> ServiceResult<RgbImage> {
    let trimmed = payload.trim();
    let encoded = match trimmed.split_once(',') {
        Some((_, rest)) => rest,
        None => trimmed,
    };

    let bytes = general_purpose::STANDARD
        .decode(encoded.as_bytes())
        .map_err(|err| ServiceError::InvalidImage(format!("base64 decode failed: {err}")))?;

    let decoded = image::load_from_memory(&bytes)
        .map_err(|err| ServiceError::InvalidImage(format!("image decode failed: {err}")))?;

    Ok(decoded.to_rgb8())
}

/// The descriptor-extraction boundary. Production binds dlib; tests supply
/// stubs.
pub trait FaceEncodingBackend {
    /// Returns every face found in the image with its encoding. Zero faces
    /// is an empty vec, not an error. `jitters` controls how many times the
    /// encoder re-samples each face.
    fn extract(&self, image: &RgbImage, jitters: u32) -> ServiceResult<Vec<DetectedFace>>;

    /// Face locations only. The default goes through `extract`; backends
    /// with a cheaper detector-only path override it.
    fn locate(&self, image: &RgbImage) -> ServiceResult<Vec<BoundingBox>> {
        Ok(self
            .extract(image, 1)?
            .into_iter()
            .map(|face| face.bounding_box)
            .collect())
    }
}

/// Resolves the multiple-faces soft condition: logs and deterministically
/// keeps the first face. Zero faces is `NoFaceDetected`.
pub fn select_primary_face(mut faces: Vec<DetectedFace>) -> ServiceResult<DetectedFace> {
    if faces.is_empty() {
        return Err(ServiceError::NoFaceDetected);
    }
    if faces.len() > 1 {
        warn!(count = faces.len(), "multiple faces detected, using the first");
    }
    Ok(faces.swap_remove(0))
}

#[cfg(feature = "dlib")]
mod dlib_backend {
    use std::env;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use dlib_face_recognition::{
        FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
        LandmarkPredictor, LandmarkPredictorTrait,
    };
    use image::RgbImage;
    use tracing::debug;

    use super::{BoundingBox, DetectedFace, FaceEncodingBackend};
    use crate::errors::{ServiceError, ServiceResult};

    #[derive(Debug, Clone)]
    pub struct FaceModelPaths {
        pub landmark: PathBuf,
        pub encoder: PathBuf,
    }

    /// Resolves model file locations: explicit configuration first, then the
    /// environment, otherwise `MissingModel`.
    pub fn resolve_model_paths(
        landmark: Option<PathBuf>,
        encoder: Option<PathBuf>,
    ) -> ServiceResult<FaceModelPaths> {
        let landmark = landmark
            .or_else(|| env::var(LANDMARK_ENV).ok().map(PathBuf::from))
            .ok_or(ServiceError::MissingModel {
                kind: "landmark predictor",
                env: LANDMARK_ENV,
            })?;

        let encoder = encoder
            .or_else(|| env::var(ENCODER_ENV).ok().map(PathBuf::from))
            .ok_or(ServiceError::MissingModel {
                kind: "face encoder network",
                env: ENCODER_ENV,
            })?;

        Ok(FaceModelPaths { landmark, encoder })
    }

    const LANDMARK_ENV: &str = "FACEGATE_LANDMARK_MODEL";
    const ENCODER_ENV: &str = "FACEGATE_ENCODER_MODEL";

    struct Models {
        detector: FaceDetector,
        predictor: LandmarkPredictor,
        encoder: FaceEncoderNetwork,
    }

    // The dlib model objects are plain heap allocations with no thread
    // affinity; all access goes through the mutex.
    unsafe impl Send for Models {}

    /// Production extractor: HOG detector, landmark predictor and ResNet
    /// encoder from dlib. Extraction is serialized behind a lock — the dlib
    /// pipeline is not safe for concurrent calls.
    pub struct DlibBackend {
        models: Mutex<Models>,
    }

    impl DlibBackend {
        pub fn new(paths: &FaceModelPaths) -> ServiceResult<Self> {
            debug!(path = %paths.landmark.display(), "loading landmark model");
            let predictor =
                LandmarkPredictor::open(&paths.landmark).map_err(|message| {
                    ServiceError::ModelLoad {
                        path: paths.landmark.clone(),
                        message,
                    }
                })?;

            debug!(path = %paths.encoder.display(), "loading encoder model");
            let encoder =
                FaceEncoderNetwork::open(&paths.encoder).map_err(|message| {
                    ServiceError::ModelLoad {
                        path: paths.encoder.clone(),
                        message,
                    }
                })?;

            Ok(Self {
                models: Mutex::new(Models {
                    detector: FaceDetector::new(),
                    predictor,
                    encoder,
                }),
            })
        }
    }

    impl FaceEncodingBackend for DlibBackend {
        fn extract(&self, image: &RgbImage, jitters: u32) -> ServiceResult<Vec<DetectedFace>> {
            let models = self
                .models
                .lock()
                .map_err(|_| ServiceError::Extraction("extractor lock poisoned".into()))?;

            let matrix = ImageMatrix::from_image(image);
            let locations = models.detector.face_locations(&matrix);

            let mut landmarks = Vec::with_capacity(locations.len());
            for rect in locations.iter() {
                landmarks.push(models.predictor.face_landmarks(&matrix, rect));
            }

            let encodings = models
                .encoder
                .get_face_encodings(&matrix, &landmarks, jitters);

            let mut faces = Vec::with_capacity(locations.len());
            for (rect, encoding) in locations.iter().zip(encodings.iter()) {
                faces.push(DetectedFace {
                    bounding_box: BoundingBox {
                        left: rect.left,
                        top: rect.top,
                        right: rect.right,
                        bottom: rect.bottom,
                    },
                    encoding: encoding.as_ref().to_vec(),
                });
            }

            Ok(faces)
        }

        fn locate(&self, image: &RgbImage) -> ServiceResult<Vec<BoundingBox>> {
            let models = self
                .models
                .lock()
                .map_err(|_| ServiceError::Extraction("extractor lock poisoned".into()))?;

            let matrix = ImageMatrix::from_image(image);
            Ok(models
                .detector
                .face_locations(&matrix)
                .iter()
                .map(|rect| BoundingBox {
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                })
                .collect())
        }
    }
}

#[cfg(feature = "dlib")]
pub use dlib_backend::{resolve_model_paths, DlibBackend, FaceModelPaths};

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use base64::Engine as _;
    use image::{DynamicImage, GrayImage, ImageOutputFormat, Rgb, RgbImage};

    use super::*;

    fn png_base64(image: DynamicImage) -> String {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        general_purpose::STANDARD.encode(bytes)
    }

    fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn decode_accepts_raw_base64() {
        let payload = png_base64(solid_rgb(4, 3, [10, 20, 30]));
        let image = decode_image(&payload).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn decode_strips_data_url_prefix() {
        let payload = format!(
            "data:image/png;base64,{}",
            png_base64(solid_rgb(2, 2, [1, 2, 3]))
        );
        let image = decode_image(&payload).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
    }

    #[test]
    fn decode_normalizes_grayscale_to_rgb() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, image::Luma([128])));
        let image = decode_image(&png_base64(gray)).unwrap();
        assert_eq!(image.get_pixel(1, 1).0, [128, 128, 128]);
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let err = decode_image("not@@base64!!").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImage(_)));
    }

    #[test]
    fn decode_rejects_non_image_bytes() {
        let payload = general_purpose::STANDARD.encode(b"definitely not a png");
        let err = decode_image(&payload).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidImage(_)));
    }

    fn face(value: f64) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox {
                left: 0,
                top: 0,
                right: 1,
                bottom: 1,
            },
            encoding: vec![value],
        }
    }

    #[test]
    fn select_primary_face_requires_a_face() {
        let err = select_primary_face(Vec::new()).unwrap_err();
        assert!(matches!(err, ServiceError::NoFaceDetected));
    }

    #[test]
    fn select_primary_face_keeps_the_first_of_many() {
        let selected = select_primary_face(vec![face(1.0), face(2.0)]).unwrap();
        assert_eq!(selected.encoding, vec![1.0]);
    }
}
