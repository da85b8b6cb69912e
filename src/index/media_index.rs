//! Media index: type, status and stored file of media entities

use std::any::Any;
use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use crate::types::{Args, ContentStatus, Event, EventKind, MediaType, ResourceType};

use super::DomainIndex;

#[derive(Debug, Clone, Default)]
struct MediaInfo {
    status: ContentStatus,
    media_type: Option<MediaType>,
    file: Option<String>,
}

impl MediaInfo {
    fn from_args(args: &Args) -> Self {
        Self {
            status: ContentStatus::from_args(args),
            media_type: MediaType::from_args(args),
            file: None,
        }
    }

    fn is_deleted(&self) -> bool {
        self.status == ContentStatus::Deleted
    }
}

/// Tracks every entity of the media resource type
///
/// Deleted media stay in the map as tombstones and answer as absent.
#[derive(Debug)]
pub struct MediaIndex {
    media_type: ResourceType,
    media: Mutex<HashMap<u64, MediaInfo>>,
}

impl Default for MediaIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaIndex {
    pub fn new() -> Self {
        Self::for_resource_type(ResourceType::media())
    }

    /// Index media registered under a different resource type name
    pub fn for_resource_type(media_type: ResourceType) -> Self {
        Self {
            media_type,
            media: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_published_image(&self, id: u64) -> bool {
        self.is_published(id, MediaType::Image)
    }

    pub fn is_published_audio(&self, id: u64) -> bool {
        self.is_published(id, MediaType::Audio)
    }

    /// Whether the media is an image, regardless of status
    pub fn is_image(&self, id: u64) -> bool {
        self.media_type(id) == Some(MediaType::Image)
    }

    pub fn is_audio(&self, id: u64) -> bool {
        self.media_type(id) == Some(MediaType::Audio)
    }

    pub fn media_type(&self, id: u64) -> Option<MediaType> {
        self.live(id).and_then(|info| info.media_type)
    }

    /// Path of the stored binary, once one was uploaded
    pub fn file_path(&self, id: u64) -> Option<String> {
        self.live(id).and_then(|info| info.file)
    }

    fn is_published(&self, id: u64, media_type: MediaType) -> bool {
        self.live(id).map_or(false, |info| {
            info.status == ContentStatus::Published && info.media_type == Some(media_type)
        })
    }

    fn live(&self, id: u64) -> Option<MediaInfo> {
        self.media
            .lock()
            .get(&id)
            .filter(|info| !info.is_deleted())
            .cloned()
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: &Value) -> Option<T> {
    serde_json::from_value(value.clone()).ok()
}

impl DomainIndex for MediaIndex {
    fn name(&self) -> &'static str {
        "media"
    }

    fn apply_event(&self, event: &Event) {
        if event.subject.resource_type != self.media_type {
            return;
        }

        let id = event.subject.id;
        let mut media = self.media.lock();

        match &event.kind {
            EventKind::Created { properties } => {
                media.insert(id, MediaInfo::from_args(properties));
            }
            EventKind::Updated { properties } => {
                if let Some(info) = media.get_mut(&id) {
                    let file = info.file.take();
                    *info = MediaInfo {
                        file,
                        ..MediaInfo::from_args(properties)
                    };
                }
            }
            EventKind::PropertyChanged { property, value } => {
                let Some(info) = media.get_mut(&id) else {
                    return;
                };
                match property.as_str() {
                    "status" => {
                        if let Some(status) = parse(value) {
                            info.status = status;
                        }
                    }
                    "type" => info.media_type = parse(value),
                    _ => {}
                }
            }
            EventKind::FileUpdated { file } => {
                if let Some(info) = media.get_mut(&id) {
                    info.file = Some(file.clone());
                }
            }
            EventKind::Deleted => {
                if let Some(info) = media.get_mut(&id) {
                    info.status = ContentStatus::Deleted;
                }
            }
            EventKind::ReferenceAdded { .. }
            | EventKind::ReferenceRemoved { .. }
            | EventKind::UserActivity { .. } => {}
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityId;
    use serde_json::json;

    fn media(id: u64) -> EntityId {
        EntityId::new(ResourceType::media(), id)
    }

    fn create(index: &MediaIndex, id: u64, args: Value) {
        let properties = args.as_object().cloned().unwrap();
        index.apply_event(&Event::created(media(id), "alice", properties));
    }

    #[test]
    fn test_published_image_and_audio() {
        let index = MediaIndex::new();
        create(&index, 0, json!({"type": "Image", "status": "Published"}));
        create(&index, 1, json!({"type": "Audio", "status": "Published"}));
        create(&index, 2, json!({"type": "Image", "status": "Draft"}));

        assert!(index.is_published_image(0));
        assert!(!index.is_published_audio(0));
        assert!(index.is_published_audio(1));
        assert!(!index.is_published_image(2));
        assert!(index.is_image(2));
        assert!(!index.is_image(99));
    }

    #[test]
    fn test_file_updated_survives_update() {
        let index = MediaIndex::new();
        create(&index, 0, json!({"type": "Audio"}));
        index.apply_event(&Event::file_updated(media(0), "alice", "media/0.mp3"));
        index.apply_event(&Event::updated(
            media(0),
            "alice",
            json!({"type": "Audio", "status": "Published"})
                .as_object()
                .cloned()
                .unwrap(),
        ));

        assert_eq!(index.file_path(0).as_deref(), Some("media/0.mp3"));
        assert!(index.is_published_audio(0));
    }

    #[test]
    fn test_deleted_media_answers_as_absent() {
        let index = MediaIndex::new();
        create(&index, 0, json!({"type": "Image", "status": "Published"}));
        index.apply_event(&Event::file_updated(media(0), "alice", "media/0.png"));
        index.apply_event(&Event::deleted(media(0), "alice"));

        assert!(!index.is_published_image(0));
        assert!(!index.is_image(0));
        assert_eq!(index.media_type(0), None);
        assert_eq!(index.file_path(0), None);
    }

    #[test]
    fn test_ignores_other_resource_types() {
        let index = MediaIndex::new();
        let exhibit = EntityId::new(ResourceType::exhibit(), 0);
        index.apply_event(&Event::created(
            exhibit,
            "alice",
            json!({"type": "Image"}).as_object().cloned().unwrap(),
        ));

        assert!(!index.is_image(0));
    }
}
