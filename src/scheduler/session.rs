use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_LANGUAGE: &str = "python";

/// A stored (language, source) pair that jobs are dispatched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub language: String,
    pub source_code: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(language: Option<String>, source_code: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            language: language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            source_code: source_code.unwrap_or_default(),
            status: "ACTIVE".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields the client may autosave; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    pub language: Option<String>,
    pub source_code: Option<String>,
}
