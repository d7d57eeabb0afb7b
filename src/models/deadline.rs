use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;
use crate::models::{Collection, Record, contains_ignore_case};

/// Deadline type tag. Tags outside the known set are kept verbatim in
/// `Other` so a write-back never rewrites them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeadlineKind {
    Homework,
    Test,
    Project,
    Essay,
    Application,
    Event,
    Club,
    Sport,
    Other(String),
}

impl DeadlineKind {
    pub fn as_str(&self) -> &str {
        match self {
            DeadlineKind::Homework => "Homework",
            DeadlineKind::Test => "Test",
            DeadlineKind::Project => "Project",
            DeadlineKind::Essay => "Essay",
            DeadlineKind::Application => "Application",
            DeadlineKind::Event => "Event",
            DeadlineKind::Club => "Club",
            DeadlineKind::Sport => "Sport",
            DeadlineKind::Other(tag) => tag,
        }
    }

    /// Event-like kinds span an interval (or a whole day) instead of a due instant.
    pub fn is_duration(&self) -> bool {
        matches!(
            self,
            DeadlineKind::Event | DeadlineKind::Club | DeadlineKind::Sport | DeadlineKind::Other(_)
        )
    }
}

impl From<String> for DeadlineKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "Homework" => DeadlineKind::Homework,
            "Test" => DeadlineKind::Test,
            "Project" => DeadlineKind::Project,
            "Essay" => DeadlineKind::Essay,
            "Application" => DeadlineKind::Application,
            "Event" => DeadlineKind::Event,
            "Club" => DeadlineKind::Club,
            "Sport" => DeadlineKind::Sport,
            _ => DeadlineKind::Other(tag),
        }
    }
}

impl Serialize for DeadlineKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeadlineKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(DeadlineKind::from)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deadline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: DeadlineKind,
    #[serde(rename = "dueDate")]
    pub start: DateTime<Utc>,
    #[serde(rename = "endDate", default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// Length assumed for items without an end time.
pub fn default_duration() -> Duration {
    Duration::hours(1)
}

impl Deadline {
    pub fn duration(&self) -> Duration {
        match self.end {
            Some(end) => end - self.start,
            None => default_duration(),
        }
    }

    /// Calendar placement (UTC days). Point-in-time items sit on their due
    /// date; duration items cover every day from start through end.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        let first = self.start.date_naive();
        if !self.kind.is_duration() {
            return first == date;
        }
        let last = self.end.map(|end| end.date_naive()).unwrap_or(first);
        first <= date && date <= last.max(first)
    }
}

impl Record for Deadline {
    const COLLECTION: Collection = Collection::Deadlines;
    const ORDER_BY: Option<&'static str> = Some("dueDate");

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if self.kind.is_duration() && !self.is_all_day {
            if let Some(end) = self.end {
                if end < self.start {
                    return Err(ValidationError::EndBeforeStart);
                }
            }
        }
        Ok(())
    }

    fn matches(&self, query: &str) -> bool {
        query.is_empty()
            || contains_ignore_case(&self.title, query)
            || contains_ignore_case(self.kind.as_str(), query)
    }
}

/// Raw task/event input. Every field is always present in the form; the
/// ones that do not apply to the chosen kind are dropped by `validate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineForm {
    pub title: String,
    pub kind: DeadlineKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_completed: bool,
}

impl DeadlineForm {
    pub fn new(title: impl Into<String>, kind: DeadlineKind, start: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            kind,
            start,
            end: start + default_duration(),
            is_all_day: false,
            details: String::new(),
            course_id: None,
            priority: Priority::default(),
            is_completed: false,
        }
    }

    pub fn from_deadline(deadline: &Deadline) -> Self {
        Self {
            title: deadline.title.clone(),
            kind: deadline.kind.clone(),
            start: deadline.start,
            end: deadline.end.unwrap_or(deadline.start + default_duration()),
            is_all_day: deadline.is_all_day,
            details: deadline.details.clone().unwrap_or_default(),
            course_id: deadline.course_id.clone(),
            priority: deadline.priority,
            is_completed: deadline.is_completed,
        }
    }

    pub fn validate(&self) -> Result<Deadline, ValidationError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingField("title"));
        }

        let is_duration = self.kind.is_duration();
        if is_duration && !self.is_all_day && self.end < self.start {
            return Err(ValidationError::EndBeforeStart);
        }

        let details = self.details.trim();
        let course_id = self
            .course_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && !is_duration)
            .map(str::to_string);

        Ok(Deadline {
            id: None,
            title: title.to_string(),
            kind: self.kind.clone(),
            start: self.start,
            end: (is_duration && !self.is_all_day).then_some(self.end),
            is_all_day: is_duration && self.is_all_day,
            is_completed: self.is_completed,
            details: (!details.is_empty()).then(|| details.to_string()),
            course_id,
            priority: self.priority,
        })
    }
}
