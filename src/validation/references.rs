//! Reference validation against the entity and media indices

use std::fmt;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::index::{EntityIndex, MediaIndex};
use crate::types::{Args, EntityId, MediaType, ResourceRegistry, ResourceType};

/// Why a referenced id was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Never created, or deleted
    Missing,
    /// Media of the wrong type
    WrongMediaType { expected: MediaType },
}

/// One rejected reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub field: String,
    pub target: EntityId,
    pub reason: FailureReason,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            FailureReason::Missing => {
                write!(f, "{}: {} does not exist", self.field, self.target)
            }
            FailureReason::WrongMediaType { expected } => {
                write!(f, "{}: {} is not {:?} media", self.field, self.target, expected)
            }
        }
    }
}

/// Media type a reference field must point at
fn expected_media(field: &str) -> MediaType {
    if field == "audio" {
        MediaType::Audio
    } else {
        MediaType::Image
    }
}

/// Checks that every reference in an argument snapshot resolves
pub struct ReferenceValidator {
    registry: Arc<ResourceRegistry>,
    entities: Arc<EntityIndex>,
    media: Arc<MediaIndex>,
    media_type: ResourceType,
}

impl ReferenceValidator {
    pub fn new(
        registry: Arc<ResourceRegistry>,
        entities: Arc<EntityIndex>,
        media: Arc<MediaIndex>,
    ) -> Self {
        Self {
            registry,
            entities,
            media,
            media_type: ResourceType::media(),
        }
    }

    /// Every failing reference of `args` for an entity of `resource_type`
    ///
    /// Unregistered resource types have no reference fields and always pass.
    pub fn check(&self, resource_type: &ResourceType, args: &Args) -> Vec<ValidationFailure> {
        let Some(shape) = self.registry.get(resource_type) else {
            return Vec::new();
        };

        let mut failures = Vec::new();
        for (field, targets) in shape.field_references(args) {
            for target in targets {
                let reason = if !self.entities.exists(&target.resource_type, target.id) {
                    Some(FailureReason::Missing)
                } else if target.resource_type == self.media_type {
                    let expected = expected_media(&field);
                    let matches = match expected {
                        MediaType::Image => self.media.is_image(target.id),
                        MediaType::Audio => self.media.is_audio(target.id),
                    };
                    (!matches).then_some(FailureReason::WrongMediaType { expected })
                } else {
                    None
                };

                if let Some(reason) = reason {
                    failures.push(ValidationFailure {
                        field: field.clone(),
                        target,
                        reason,
                    });
                }
            }
        }
        failures
    }

    /// Like [`check`](Self::check), as a result
    pub fn validate(&self, resource_type: &ResourceType, args: &Args) -> EngineResult<()> {
        let failures = self.check(resource_type, args);
        if failures.is_empty() {
            Ok(())
        } else {
            tracing::debug!(
                resource_type = %resource_type,
                failures = failures.len(),
                "Rejected argument snapshot"
            );
            Err(EngineError::Validation(failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DomainIndex;
    use crate::types::Event;
    use serde_json::json;

    fn args(value: serde_json::Value) -> Args {
        value.as_object().cloned().unwrap()
    }

    fn setup() -> ReferenceValidator {
        let entities = Arc::new(EntityIndex::new());
        let media = Arc::new(MediaIndex::new());

        let events = vec![
            Event::created(
                EntityId::new(ResourceType::media(), 0),
                "alice",
                args(json!({"type": "Image"})),
            ),
            Event::created(
                EntityId::new(ResourceType::media(), 1),
                "alice",
                args(json!({"type": "Audio"})),
            ),
            Event::created(EntityId::new(ResourceType::exhibit_page(), 0), "alice", Args::new()),
            Event::created(EntityId::new(ResourceType::exhibit_page(), 1), "alice", Args::new()),
            Event::deleted(EntityId::new(ResourceType::exhibit_page(), 1), "alice"),
        ];
        for event in &events {
            entities.apply_event(event);
            media.apply_event(event);
        }

        ReferenceValidator::new(Arc::new(ResourceRegistry::standard()), entities, media)
    }

    #[test]
    fn test_valid_references_pass() {
        let validator = setup();
        let result = validator.validate(
            &ResourceType::exhibit_page(),
            &args(json!({"image": 0, "audio": 1, "additionalInformationPages": [0]})),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_and_deleted_targets() {
        let validator = setup();
        let failures = validator.check(
            &ResourceType::exhibit(),
            &args(json!({"pages": [1, 7]})),
        );

        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.reason == FailureReason::Missing));
    }

    #[test]
    fn test_wrong_media_type() {
        let validator = setup();
        let failures = validator.check(
            &ResourceType::exhibit_page(),
            &args(json!({"image": 1, "audio": 0})),
        );

        assert_eq!(failures.len(), 2);
        let audio = failures.iter().find(|f| f.field == "audio").unwrap();
        assert_eq!(
            audio.reason,
            FailureReason::WrongMediaType {
                expected: MediaType::Audio
            }
        );
        assert_eq!(audio.to_string(), "audio: Media/0 is not Audio media");
    }

    #[test]
    fn test_validate_returns_engine_error() {
        let validator = setup();
        let result = validator.validate(&ResourceType::route(), &args(json!({"exhibits": [3]})));
        assert!(matches!(result, Err(EngineError::Validation(f)) if f.len() == 1));
    }
}
