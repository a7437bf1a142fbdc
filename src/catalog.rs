//! Catalog of recognized event type names.
//!
//! The catalog exists for discoverability on the administrative surface;
//! the engine itself accepts any well-formed event type name so feature
//! modules can introduce new events without touching this crate.

use serde::{Deserialize, Serialize};

/// Category an event type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Document,
    Collaboration,
    Voice,
    Mobile,
    System,
}

/// Recognized webhook event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    DocumentUploaded,
    DocumentProcessed,
    DocumentDeleted,
    CitationGenerated,
    GrantDeadlineApproaching,
    NoteSynced,
    CollaborationShared,
    CommentAdded,
    VoiceTranscriptionCompleted,
    VoiceCommandExecuted,
    MobileSyncCompleted,
    MobileDeviceRegistered,
    CircuitOpened,
    CircuitClosed,
    SystemMaintenance,
}

impl WebhookEventType {
    /// Wire name of the event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentUploaded => "document.uploaded",
            Self::DocumentProcessed => "document.processed",
            Self::DocumentDeleted => "document.deleted",
            Self::CitationGenerated => "document.citation_generated",
            Self::GrantDeadlineApproaching => "document.grant_deadline_approaching",
            Self::NoteSynced => "collaboration.note_synced",
            Self::CollaborationShared => "collaboration.shared",
            Self::CommentAdded => "collaboration.comment_added",
            Self::VoiceTranscriptionCompleted => "voice.transcription_completed",
            Self::VoiceCommandExecuted => "voice.command_executed",
            Self::MobileSyncCompleted => "mobile.sync_completed",
            Self::MobileDeviceRegistered => "mobile.device_registered",
            Self::CircuitOpened => "system.webhook_circuit_opened",
            Self::CircuitClosed => "system.webhook_circuit_closed",
            Self::SystemMaintenance => "system.maintenance",
        }
    }

    /// Parse a wire name into a recognized event type.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|et| et.as_str() == s)
    }

    /// Category of the event type.
    #[must_use]
    pub fn category(&self) -> EventCategory {
        match self {
            Self::DocumentUploaded
            | Self::DocumentProcessed
            | Self::DocumentDeleted
            | Self::CitationGenerated
            | Self::GrantDeadlineApproaching => EventCategory::Document,
            Self::NoteSynced | Self::CollaborationShared | Self::CommentAdded => {
                EventCategory::Collaboration
            }
            Self::VoiceTranscriptionCompleted | Self::VoiceCommandExecuted => EventCategory::Voice,
            Self::MobileSyncCompleted | Self::MobileDeviceRegistered => EventCategory::Mobile,
            Self::CircuitOpened | Self::CircuitClosed | Self::SystemMaintenance => {
                EventCategory::System
            }
        }
    }

    /// All recognized event types.
    #[must_use]
    pub fn all() -> &'static [WebhookEventType] {
        &[
            Self::DocumentUploaded,
            Self::DocumentProcessed,
            Self::DocumentDeleted,
            Self::CitationGenerated,
            Self::GrantDeadlineApproaching,
            Self::NoteSynced,
            Self::CollaborationShared,
            Self::CommentAdded,
            Self::VoiceTranscriptionCompleted,
            Self::VoiceCommandExecuted,
            Self::MobileSyncCompleted,
            Self::MobileDeviceRegistered,
            Self::CircuitOpened,
            Self::CircuitClosed,
            Self::SystemMaintenance,
        ]
    }

    /// Whether a wire name is in the catalog.
    #[must_use]
    pub fn is_recognized(s: &str) -> bool {
        Self::parse(s).is_some()
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A catalog entry for the administrative surface.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub category: EventCategory,
}

/// Enumerate the catalog for discoverability.
#[must_use]
pub fn event_catalog() -> Vec<CatalogEntry> {
    WebhookEventType::all()
        .iter()
        .map(|et| CatalogEntry {
            name: et.as_str(),
            category: et.category(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for et in WebhookEventType::all() {
            assert_eq!(WebhookEventType::parse(et.as_str()), Some(*et));
        }
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(WebhookEventType::parse("no.such.event"), None);
        assert!(!WebhookEventType::is_recognized("no.such.event"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            WebhookEventType::DocumentUploaded.category(),
            EventCategory::Document
        );
        assert_eq!(
            WebhookEventType::CircuitOpened.category(),
            EventCategory::System
        );
        assert_eq!(
            WebhookEventType::NoteSynced.category(),
            EventCategory::Collaboration
        );
    }

    #[test]
    fn test_catalog_covers_all_types() {
        assert_eq!(event_catalog().len(), WebhookEventType::all().len());
    }
}
