use serde::Serialize;

use crate::models::Course;

/// Percentage breakpoints on the 4.0 scale, highest first.
const SCALE: [(f64, f64); 10] = [
    (93.0, 4.0),
    (90.0, 3.7),
    (87.0, 3.3),
    (83.0, 3.0),
    (80.0, 2.7),
    (77.0, 2.3),
    (73.0, 2.0),
    (70.0, 1.7),
    (67.0, 1.3),
    (65.0, 1.0),
];

const EMPTY_GPA: &str = "0.00";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpaSummary {
    pub unweighted: String,
    pub weighted: String,
}

impl Default for GpaSummary {
    fn default() -> Self {
        Self {
            unweighted: EMPTY_GPA.to_string(),
            weighted: EMPTY_GPA.to_string(),
        }
    }
}

pub fn grade_points(percent: f64) -> f64 {
    SCALE
        .iter()
        .find(|(min, _)| percent >= *min)
        .map(|(_, points)| *points)
        .unwrap_or(0.0)
}

/// Credit-weighted `(unweighted, weighted)` averages over graded courses.
/// `None` when no course contributes any credits.
pub fn averages(courses: &[Course]) -> Option<(f64, f64)> {
    let mut credits = 0.0;
    let mut unweighted = 0.0;
    let mut weighted = 0.0;

    for course in courses {
        let Some(percent) = course.grade_percent.filter(|p| p.is_finite()) else {
            continue;
        };
        if !course.credits.is_finite() || course.credits <= 0.0 {
            continue;
        }
        let points = grade_points(percent);
        credits += course.credits;
        unweighted += points * course.credits;
        weighted += (points + course.course_level.bonus()) * course.credits;
    }

    (credits > 0.0).then(|| (unweighted / credits, weighted / credits))
}

pub fn calculate(courses: &[Course]) -> GpaSummary {
    match averages(courses) {
        Some((unweighted, weighted)) => GpaSummary {
            unweighted: format!("{:.2}", unweighted),
            weighted: format!("{:.2}", weighted),
        },
        None => GpaSummary::default(),
    }
}
