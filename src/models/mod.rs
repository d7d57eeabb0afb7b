pub mod course;
pub mod deadline;
pub mod document;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ValidationError;

pub use course::{Course, CourseForm, CourseLevel, GRADE_LEVELS};
pub use deadline::{Deadline, DeadlineForm, DeadlineKind, Priority};
pub use document::{Collection, Document, Snapshot, UserId};

/// A typed record living in one of the per-user collections.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const COLLECTION: Collection;

    /// Field the store is asked to sort snapshots by.
    const ORDER_BY: Option<&'static str> = None;

    fn id(&self) -> Option<&str>;

    fn set_id(&mut self, id: String);

    fn validate(&self) -> Result<(), ValidationError>;

    /// Case-insensitive search used by the list filters.
    fn matches(&self, query: &str) -> bool;

    fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        let mut record: Self = serde_json::from_value(doc.data.clone())?;
        record.set_id(doc.id.clone());
        Ok(record)
    }

    /// JSON body for the store. The id lives in the document key, not the body.
    fn to_data(&self) -> Result<Value, serde_json::Error> {
        let mut data = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut data {
            map.remove("id");
        }
        Ok(data)
    }
}

pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
