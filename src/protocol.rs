//! JSON wire messages exchanged with observers.
//!
//! Every message is an object tagged by `type` with camelCase fields, e.g.
//! `{"type":"REQUEST_UPDATE","viewId":"left","path":"/docs"}`.

use crate::tree::{Listing, ListingEntry};
use crate::types::ViewId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Clipboard paste mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipboardMode {
    Copy,
    Cut,
}

/// Client → server intents
///
/// Paths arrive as raw strings and are validated by the gateway, so an
/// unsafe path yields an `ERROR` event instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    RequestUpdate { view_id: ViewId, path: String },
    DestroyView { view_id: ViewId },
    CreateFolder { path: String },
    CreateFile { path: String },
    DeleteFile { path: String },
    Clipboard { src: String, dst: String, mode: ClipboardMode },
    Rename { src: String, dst: String },
    SaveFile { view_id: ViewId, to: String, value: String },
    SetUpdateInterval { interval_ms: u64 },
}

impl ClientMessage {
    /// The view an error for this message should be attributed to.
    pub fn view_id(&self) -> Option<&ViewId> {
        match self {
            ClientMessage::RequestUpdate { view_id, .. }
            | ClientMessage::DestroyView { view_id }
            | ClientMessage::SaveFile { view_id, .. } => Some(view_id),
            _ => None,
        }
    }
}

/// Server → client events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    UpdateDirectory {
        view_id: ViewId,
        folder: String,
        data: BTreeMap<String, ListingEntry>,
    },
    UpdateBeFile {
        view_id: ViewId,
        file: String,
        folder: String,
    },
    Error {
        view_id: Option<ViewId>,
        text: String,
    },
}

impl ServerMessage {
    pub fn directory(view_id: ViewId, listing: Listing) -> Self {
        ServerMessage::UpdateDirectory {
            view_id,
            folder: listing.folder.to_string(),
            data: listing.entries,
        }
    }

    pub fn error(view_id: Option<ViewId>, text: impl Into<String>) -> Self {
        ServerMessage::Error {
            view_id,
            text: text.into(),
        }
    }
}
