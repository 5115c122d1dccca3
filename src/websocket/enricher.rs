//! Message Enricher
//!
//! Stamps client messages with the sender's server-side identity before they
//! are stored and fanned out. Client-supplied values for the injected fields
//! are always overwritten.

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::registry::Identity;

/// Message type that gets a fresh `strokeId`
pub const DRAW_TYPE: &str = "draw";

pub const SENDER_ID_FIELD: &str = "senderId";
pub const SENDER_NAME_FIELD: &str = "senderDisplayName";
pub const STROKE_ID_FIELD: &str = "strokeId";

/// Reasons a client message cannot be enriched
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,
}

/// Enrich a raw client message and re-serialize it
pub fn enrich(raw: &str, identity: &Identity) -> Result<String, EnrichError> {
    let Value::Object(mut fields) = serde_json::from_str::<Value>(raw)? else {
        return Err(EnrichError::NotAnObject);
    };

    stamp(&mut fields, identity);
    Ok(serde_json::to_string(&fields)?)
}

fn stamp(fields: &mut Map<String, Value>, identity: &Identity) {
    fields.insert(SENDER_ID_FIELD.into(), Value::String(identity.id.clone()));
    fields.insert(
        SENDER_NAME_FIELD.into(),
        Value::String(identity.display_name.clone()),
    );

    if fields.get("type").and_then(Value::as_str) == Some(DRAW_TYPE) {
        fields.insert(
            STROKE_ID_FIELD.into(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
}
