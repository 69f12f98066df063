use serde::Serialize;
use tracing::info;

use crate::errors::{ServiceError, ServiceResult};
use crate::faces::extractor::{decode_image, select_primary_face, BoundingBox, FaceEncodingBackend};
use crate::faces::store::{EncodingStore, EnrollmentRecord};

/// Process-wide match policy. Enrollment re-samples the face more than
/// verification does: enrollment happens once per user and its descriptor
/// is reused for every later verification, so the extra latency buys
/// stability where it pays off most.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    pub tolerance: f64,
    pub model: String,
    pub enroll_jitters: u32,
    pub verify_jitters: u32,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            model: "large".to_string(),
            enroll_jitters: 2,
            verify_jitters: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Enrollment {
    pub user_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Verification {
    pub matched: bool,
    pub distance: f64,
    pub confidence: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub face_count: usize,
    pub boxes: Vec<BoundingBox>,
}

/// The verification service: one instance per process, constructed at
/// startup and injected into every request handler.
pub struct FaceService {
    store: EncodingStore,
    backend: Box<dyn FaceEncodingBackend + Send + Sync>,
    policy: ServicePolicy,
}

impl FaceService {
    pub fn new(
        store: EncodingStore,
        backend: Box<dyn FaceEncodingBackend + Send + Sync>,
        policy: ServicePolicy,
    ) -> Self {
        Self {
            store,
            backend,
            policy,
        }
    }

    pub fn policy(&self) -> &ServicePolicy {
        &self.policy
    }

    /// Stores the encoding of the primary face in the image against
    /// `user_id`, replacing any previous enrollment.
    pub fn enroll(&self, user_id: &str, image_b64: &str) -> ServiceResult<Enrollment> {
        validate_user_id(user_id)?;
        let image = decode_image(image_b64)?;
        let faces = self.backend.extract(&image, self.policy.enroll_jitters)?;
        let face = select_primary_face(faces)?;

        let record = EnrollmentRecord::new(user_id, face.encoding, &self.policy.model);
        self.store.put(&record)?;
        info!(user_id, model = %record.model, "face enrolled");

        Ok(Enrollment {
            user_id: record.user_id,
            created_at: record.created_at,
        })
    }

    /// Compares the primary face in the image against the stored encoding.
    ///
    /// The enrollment lookup happens before the image is decoded, so an
    /// unenrolled user gets `UserNotEnrolled` regardless of what was
    /// submitted.
    pub fn verify(&self, user_id: &str, image_b64: &str) -> ServiceResult<Verification> {
        validate_user_id(user_id)?;
        let known = self.store.get(user_id)?;

        let image = decode_image(image_b64)?;
        let faces = self.backend.extract(&image, self.policy.verify_jitters)?;
        let face = select_primary_face(faces)?;

        let result = super::matcher::compare(&known, &face.encoding, self.policy.tolerance)?;
        info!(
            user_id,
            matched = result.is_match,
            distance = result.distance,
            "face verification"
        );

        Ok(Verification {
            matched: result.is_match,
            distance: result.distance,
            confidence: result.confidence,
            tolerance: self.policy.tolerance,
        })
    }

    /// Destroys the enrollment for `user_id`. Fails with `UserNotEnrolled`
    /// if there is none; never transitions state in that case.
    pub fn delete(&self, user_id: &str) -> ServiceResult<()> {
        validate_user_id(user_id)?;
        self.store.delete(user_id)?;
        info!(user_id, "enrollment deleted");
        Ok(())
    }

    /// Reports face locations in the image without touching the store.
    pub fn detect(&self, image_b64: &str) -> ServiceResult<Detection> {
        let image = decode_image(image_b64)?;
        let boxes = self.backend.locate(&image)?;
        Ok(Detection {
            face_count: boxes.len(),
            boxes,
        })
    }

    pub fn cache_connected(&self) -> bool {
        self.store.cache_connected()
    }
}

/// User ids are opaque but interpolated into storage keys, so the charset
/// is restricted.
pub fn validate_user_id(user_id: &str) -> ServiceResult<()> {
    if user_id.is_empty() {
        return Err(ServiceError::InvalidUserId {
            user_id: user_id.to_string(),
            message: "user id cannot be empty".into(),
        });
    }

    if !user_id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
    {
        return Err(ServiceError::InvalidUserId {
            user_id: user_id.to_string(),
            message: "use ASCII letters, numbers, '-', '_' or '.' only".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_may_use_uuid_and_simple_names() {
        validate_user_id("alice").unwrap();
        validate_user_id("550e8400-e29b-41d4-a716-446655440000").unwrap();
        validate_user_id("kiosk_7.local").unwrap();
    }

    #[test]
    fn empty_user_id_is_rejected() {
        let err = validate_user_id("").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidUserId { .. }));
    }

    #[test]
    fn path_separators_are_rejected() {
        for user_id in ["../alice", "a/b", "a\\b", "user id"] {
            let err = validate_user_id(user_id).unwrap_err();
            assert!(matches!(err, ServiceError::InvalidUserId { .. }), "{user_id}");
        }
    }
}
