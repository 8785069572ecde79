//! Helpers for the schemaless documents passing through the access layer.
//!
//! Documents are plain [`bson::Document`]s. This module deals with the two fields the core
//! cares about: the `_id` identifier and the transient display index injected into listed
//! documents.

use bson::{Bson, Document, oid::ObjectId};

/// Name of the identifier field.
pub const ID_FIELD: &str = "_id";

/// Name of the 1-based display index injected into listed documents.
///
/// Stored field names cannot start with `$`, so the annotation never collides with user data
/// and is stripped from any payload written back.
pub const DOCUMENT_INDEX_FIELD: &str = "$index";

/// Returns true when `input` has the shape of an ObjectId: exactly 24 hex digits.
pub fn resembles_object_id(input: &str) -> bool {
    input.len() == 24 && input.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Turns a caller-supplied identifier into the value stored under `_id`.
///
/// Strings shaped like an ObjectId become an [`ObjectId`]; other strings stay strings.
pub fn objectify_id(id: &str) -> Bson {
    let trimmed = id.trim();

    if resembles_object_id(trimmed) {
        if let Ok(oid) = ObjectId::parse_str(trimmed) {
            return Bson::ObjectId(oid);
        }
    }

    Bson::String(trimmed.to_string())
}

/// Renders an identifier for messages and lookups: hex for ObjectIds, raw text for strings.
pub fn display_id(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalizes the `_id` of a document to the canonical ObjectId form.
///
/// Drivers and JSON bridges may hand back identifiers as extended JSON (`{"$oid": "<hex>"}`).
/// Those are converted to [`Bson::ObjectId`]; every other identifier is left untouched.
pub fn normalize_id(document: &mut Document) {
    let replacement = match document.get(ID_FIELD) {
        Some(Bson::Document(wrapper)) if wrapper.len() == 1 => match wrapper.get("$oid") {
            Some(Bson::String(hex)) => ObjectId::parse_str(hex).ok(),
            _ => None,
        },
        _ => None,
    };

    if let Some(oid) = replacement {
        document.insert(ID_FIELD, oid);
    }
}

/// Injects display indices into `documents`, starting at `first` and following their order.
pub fn annotate_indices(documents: &mut [Document], first: u64) {
    for (offset, document) in documents.iter_mut().enumerate() {
        let index = first.saturating_add(offset as u64);
        document.insert(DOCUMENT_INDEX_FIELD, Bson::Int64(i64::try_from(index).unwrap_or(i64::MAX)));
    }
}

/// Removes the fields a write must never carry: the immutable identifier and the display index.
pub fn strip_immutable_fields(document: &mut Document) {
    document.remove(ID_FIELD);
    document.remove(DOCUMENT_INDEX_FIELD);
}
