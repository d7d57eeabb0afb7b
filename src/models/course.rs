use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::models::{Collection, Record, contains_ignore_case};

pub const GRADE_LEVELS: [u8; 4] = [9, 10, 11, 12];

const MAX_CREDITS: f64 = 10.0;
const MAX_GRADE_PERCENT: f64 = 110.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CourseLevel {
    Regular,
    Honors,
    #[serde(rename = "AP")]
    Ap,
    #[serde(rename = "IB")]
    Ib,
}

impl CourseLevel {
    pub const ALL: [CourseLevel; 4] = [
        CourseLevel::Regular,
        CourseLevel::Honors,
        CourseLevel::Ap,
        CourseLevel::Ib,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CourseLevel::Regular => "Regular",
            CourseLevel::Honors => "Honors",
            CourseLevel::Ap => "AP",
            CourseLevel::Ib => "IB",
        }
    }

    /// Points added on top of the unweighted scale.
    pub fn bonus(&self) -> f64 {
        match self {
            CourseLevel::Regular => 0.0,
            CourseLevel::Honors => 0.5,
            CourseLevel::Ap | CourseLevel::Ib => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub grade_level: u8,
    pub course_level: CourseLevel,
    pub credits: f64,
    #[serde(default)]
    pub grade_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Course {
    pub fn is_graded(&self) -> bool {
        self.grade_percent.is_some()
    }
}

impl Record for Course {
    const COLLECTION: Collection = Collection::Courses;

    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_id(&mut self, id: String) {
        self.id = Some(id);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if !GRADE_LEVELS.contains(&self.grade_level) {
            return Err(ValidationError::InvalidGradeLevel(self.grade_level));
        }
        validate_credits(self.credits)?;
        if let Some(grade) = self.grade_percent {
            validate_grade(grade)?;
        }
        Ok(())
    }

    fn matches(&self, query: &str) -> bool {
        query.is_empty()
            || contains_ignore_case(&self.name, query)
            || contains_ignore_case(self.course_level.as_str(), query)
    }
}

fn validate_credits(credits: f64) -> Result<(), ValidationError> {
    let on_step = (credits * 2.0).fract() == 0.0;
    if !credits.is_finite() || !(0.0..=MAX_CREDITS).contains(&credits) || !on_step {
        return Err(ValidationError::InvalidCredits(credits));
    }
    Ok(())
}

fn validate_grade(grade: f64) -> Result<(), ValidationError> {
    if !grade.is_finite() || !(0.0..=MAX_GRADE_PERCENT).contains(&grade) {
        return Err(ValidationError::GradeOutOfRange(grade));
    }
    Ok(())
}

/// Raw course input as typed by the user. `grade` is free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseForm {
    pub name: String,
    pub grade_level: u8,
    pub course_level: CourseLevel,
    pub credits: f64,
    #[serde(default)]
    pub grade: String,
}

impl Default for CourseForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            grade_level: 9,
            course_level: CourseLevel::Regular,
            credits: 3.0,
            grade: String::new(),
        }
    }
}

impl CourseForm {
    pub fn from_course(course: &Course) -> Self {
        Self {
            name: course.name.clone(),
            grade_level: course.grade_level,
            course_level: course.course_level,
            credits: course.credits,
            grade: course
                .grade_percent
                .map(|g| g.to_string())
                .unwrap_or_default(),
        }
    }

    /// Checks the input and builds an unsaved record (no id, no timestamp).
    pub fn validate(&self) -> Result<Course, ValidationError> {
        let grade_text = self.grade.trim();
        let grade_percent = if grade_text.is_empty() {
            None
        } else {
            let grade = grade_text
                .parse::<f64>()
                .map_err(|_| ValidationError::InvalidGrade(grade_text.to_string()))?;
            Some(grade)
        };

        let course = Course {
            id: None,
            name: self.name.trim().to_string(),
            grade_level: self.grade_level,
            course_level: self.course_level,
            credits: self.credits,
            grade_percent,
            created_at: None,
        };
        course.validate()?;
        Ok(course)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(grade: &str) -> CourseForm {
        CourseForm {
            name: "Algebra II".to_string(),
            grade_level: 10,
            course_level: CourseLevel::Honors,
            credits: 3.0,
            grade: grade.to_string(),
        }
    }

    #[test]
    fn test_form_parses_grade() {
        let course = form(" 92.5 ").validate().expect("valid form");
        assert_eq!(course.grade_percent, Some(92.5));
        assert_eq!(course.id, None);
        assert_eq!(course.name, "Algebra II");
    }

    #[test]
    fn test_empty_grade_means_ungraded() {
        let course = form("").validate().expect("valid form");
        assert!(!course.is_graded());
    }

    #[test]
    fn test_non_numeric_grade_rejected() {
        let err = form("A+").validate().unwrap_err();
        assert_eq!(err, ValidationError::InvalidGrade("A+".to_string()));
    }

    #[test]
    fn test_grade_out_of_range_rejected() {
        assert_eq!(
            form("110.5").validate().unwrap_err(),
            ValidationError::GradeOutOfRange(110.5)
        );
        assert_eq!(
            form("-1").validate().unwrap_err(),
            ValidationError::GradeOutOfRange(-1.0)
        );
        assert!(matches!(
            form("NaN").validate().unwrap_err(),
            ValidationError::GradeOutOfRange(_)
        ));
        assert!(form("110").validate().is_ok());
        assert!(form("0").validate().is_ok());
    }

    #[test]
    fn test_credits_must_be_half_steps() {
        let mut f = form("90");
        f.credits = 2.25;
        assert_eq!(f.validate().unwrap_err(), ValidationError::InvalidCredits(2.25));
        f.credits = 10.5;
        assert_eq!(f.validate().unwrap_err(), ValidationError::InvalidCredits(10.5));
        f.credits = 0.5;
        assert!(f.validate().is_ok());
    }

    #[test]
    fn test_blank_name_and_bad_grade_level() {
        let mut f = form("90");
        f.name = "   ".to_string();
        assert_eq!(f.validate().unwrap_err(), ValidationError::MissingField("name"));

        let mut f = form("90");
        f.grade_level = 8;
        assert_eq!(f.validate().unwrap_err(), ValidationError::InvalidGradeLevel(8));
    }

    #[test]
    fn test_document_layout_is_camel_case() {
        let mut course = form("88").validate().unwrap();
        course.set_id("abc".to_string());

        let data = course.to_data().unwrap();
        assert_eq!(data["gradeLevel"], 10);
        assert_eq!(data["courseLevel"], "Honors");
        assert_eq!(data["gradePercent"], 88.0);
        assert!(data.get("id").is_none());

        let doc = crate::models::Document { id: "abc".to_string(), data };
        let decoded = Course::from_document(&doc).unwrap();
        assert_eq!(decoded, course);
    }

    #[test]
    fn test_matches_name_or_level() {
        let course = form("90").validate().unwrap();
        assert!(course.matches(""));
        assert!(course.matches("algebra"));
        assert!(course.matches("HONORS"));
        assert!(!course.matches("biology"));
    }

    #[test]
    fn test_form_round_trips_existing_course() {
        let course = form("91.5").validate().unwrap();
        let prefilled = CourseForm::from_course(&course);
        assert_eq!(prefilled.grade, "91.5");
        assert_eq!(prefilled.validate().unwrap(), course);
    }
}
