pub mod cache;
pub mod extractor;
pub mod matcher;
pub mod service;
pub mod store;

pub use cache::{EncodingCache, RedisEncodingCache};

pub use extractor::{
    decode_image, select_primary_face, BoundingBox, DetectedFace, FaceEncodingBackend,
};

#[cfg(feature = "dlib")]
pub use extractor::{resolve_model_paths, DlibBackend, FaceModelPaths};

pub use matcher::{compare, euclidean_distance, MatchResult};

pub use service::{
    validate_user_id, Detection, Enrollment, FaceService, ServicePolicy, Verification,
};

pub use store::{DurableStore, EncodingStore, EnrollmentRecord, FsEncodingStore};
