// 📄 Record Model - one course enrollment's grade
// Identity = (course_id, semester). Same course in another semester is a
// retake and a separate entity.

use crate::error::RecordError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Separator used when an identity key is rendered as a single string
pub const KEY_SEPARATOR: char = '|';

// ============================================================================
// IDENTITY KEY
// ============================================================================

/// `(course_id, semester)` - uniquely identifies one enrollment.
///
/// Ordered by semester first, then course id, so iterating a map of keys
/// yields the same order notifications are rendered in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey {
    course_id: String,
    semester: String,
}

impl IdentityKey {
    pub fn new(course_id: &str, semester: &str) -> Result<Self, RecordError> {
        let course_id = non_blank(course_id).ok_or(RecordError::MissingCourseId)?;
        let semester = non_blank(semester).ok_or(RecordError::MissingSemester)?;
        if course_id.contains(KEY_SEPARATOR) {
            return Err(RecordError::InvalidCourseId(course_id));
        }
        Ok(IdentityKey { course_id, semester })
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn semester(&self) -> &str {
        &self.semester
    }

    /// Parse the `course_id|semester` form used in the persisted mapping
    pub fn parse(s: &str) -> Result<Self, RecordError> {
        let (course_id, semester) = s
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| RecordError::MalformedKey(s.to_string()))?;
        IdentityKey::new(course_id, semester)
    }
}

impl Ord for IdentityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.semester
            .cmp(&other.semester)
            .then_with(|| self.course_id.cmp(&other.course_id))
    }
}

impl PartialOrd for IdentityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.course_id, KEY_SEPARATOR, self.semester)
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = RecordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdentityKey::parse(&value)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.to_string()
    }
}

// ============================================================================
// GRADE RECORD
// ============================================================================

/// One course's grade result.
///
/// Only the identity fields are mandatory. Every other field may be unknown
/// (`None`); an unknown field never counts as a difference when a fresh
/// record is compared against a stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordFields")]
pub struct GradeRecord {
    course_id: String,
    semester: String,
    course_name: Option<String>,
    credit: Option<f64>,
    grade: Option<String>,
    grade_point: Option<f64>,
    course_type: Option<String>,
}

impl GradeRecord {
    /// Create a record with only its identity known
    pub fn new(course_id: &str, semester: &str) -> Result<Self, RecordError> {
        let key = IdentityKey::new(course_id, semester)?;
        Ok(GradeRecord {
            course_id: key.course_id,
            semester: key.semester,
            course_name: None,
            credit: None,
            grade: None,
            grade_point: None,
            course_type: None,
        })
    }

    /// Builder pattern: course name (blank = unknown)
    pub fn with_course_name(mut self, name: &str) -> Self {
        self.course_name = non_blank(name);
        self
    }

    /// Builder pattern: credit value
    pub fn with_credit(mut self, credit: f64) -> Self {
        self.credit = Some(credit).filter(|c| c.is_finite());
        self
    }

    /// Builder pattern: raw grade (blank = unknown)
    pub fn with_grade(mut self, grade: &str) -> Self {
        self.grade = non_blank(grade);
        self
    }

    /// Builder pattern: grade point
    pub fn with_grade_point(mut self, grade_point: f64) -> Self {
        self.grade_point = Some(grade_point).filter(|g| g.is_finite());
        self
    }

    /// Builder pattern: course category label
    pub fn with_course_type(mut self, course_type: &str) -> Self {
        self.course_type = non_blank(course_type);
        self
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            course_id: self.course_id.clone(),
            semester: self.semester.clone(),
        }
    }

    pub fn course_id(&self) -> &str {
        &self.course_id
    }

    pub fn semester(&self) -> &str {
        &self.semester
    }

    pub fn course_name(&self) -> Option<&str> {
        self.course_name.as_deref()
    }

    pub fn credit(&self) -> Option<f64> {
        self.credit
    }

    pub fn grade(&self) -> Option<&str> {
        self.grade.as_deref()
    }

    pub fn grade_point(&self) -> Option<f64> {
        self.grade_point
    }

    pub fn course_type(&self) -> Option<&str> {
        self.course_type.as_deref()
    }

    /// Course name when known, otherwise the course id
    pub fn display_name(&self) -> &str {
        self.course_name.as_deref().unwrap_or(&self.course_id)
    }

    /// Compare the non-identity fields of a stored record against a freshly
    /// fetched one.
    ///
    /// A field the fetched record does not know is ignored; a fetched value
    /// where the stored record had none is a difference.
    pub fn content_equal(stored: &GradeRecord, fetched: &GradeRecord) -> bool {
        field_matches(&stored.course_name, &fetched.course_name, |a, b| a == b)
            && field_matches(&stored.credit, &fetched.credit, same_number)
            && field_matches(&stored.grade, &fetched.grade, |a, b| a == b)
            && field_matches(&stored.grade_point, &fetched.grade_point, same_number)
            && field_matches(&stored.course_type, &fetched.course_type, |a, b| a == b)
    }

    /// Merge a later fetch onto this record: known fetched fields win,
    /// unknown fetched fields keep the stored value.
    ///
    /// The stored grade point belongs to the stored grade, so it is dropped
    /// when the grade changes and the fetch carries no grade point of its own.
    pub fn merged_with(&self, fetched: &GradeRecord) -> GradeRecord {
        let grade_changed = fetched.grade.is_some() && fetched.grade != self.grade;
        let grade_point = match fetched.grade_point {
            Some(point) => Some(point),
            None if grade_changed => None,
            None => self.grade_point,
        };

        GradeRecord {
            course_id: self.course_id.clone(),
            semester: self.semester.clone(),
            course_name: fetched.course_name.clone().or_else(|| self.course_name.clone()),
            credit: fetched.credit.or(self.credit),
            grade: fetched.grade.clone().or_else(|| self.grade.clone()),
            grade_point,
            course_type: fetched.course_type.clone().or_else(|| self.course_type.clone()),
        }
    }

    /// Grade parsed as a numeric score ("92", "87.5"); None for letters and
    /// pass/fail markers.
    pub fn numeric_grade(&self) -> Option<f64> {
        self.grade
            .as_deref()
            .and_then(|g| g.trim().parse::<f64>().ok())
            .filter(|x| x.is_finite())
    }

    /// Fill an unknown grade point from a numeric grade.
    ///
    /// GPA(x) = 4 - 3 * (100 - x)^2 / 1600, clamped to [0, 4].
    /// Returns true when the record changed.
    pub fn derive_grade_point(&mut self, precision: u32) -> bool {
        if self.grade_point.is_some() {
            return false;
        }
        let Some(score) = self.numeric_grade() else {
            return false;
        };

        let gpa = grade_point_from_score(score);
        if !gpa.is_finite() {
            return false;
        }

        self.grade_point = Some(round_to(gpa, precision));
        true
    }
}

impl fmt::Display for GradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.display_name(),
            self.semester,
            self.grade.as_deref().unwrap_or("-")
        )
    }
}

/// Score → grade point on the 4.0 scale
pub fn grade_point_from_score(score: f64) -> f64 {
    let gpa = 4.0 - 3.0 * (100.0 - score).powi(2) / 1600.0;
    gpa.clamp(0.0, 4.0)
}

// ============================================================================
// DESERIALIZATION (validated)
// ============================================================================

/// Shape accepted from storage; converted through the validating builder
#[derive(Deserialize)]
struct RecordFields {
    course_id: String,
    semester: String,
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    credit: Option<f64>,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    grade_point: Option<f64>,
    #[serde(default)]
    course_type: Option<String>,
}

impl TryFrom<RecordFields> for GradeRecord {
    type Error = RecordError;

    fn try_from(fields: RecordFields) -> Result<Self, Self::Error> {
        let mut record = GradeRecord::new(&fields.course_id, &fields.semester)?;
        if let Some(name) = fields.course_name.as_deref() {
            record = record.with_course_name(name);
        }
        if let Some(credit) = fields.credit {
            record = record.with_credit(credit);
        }
        if let Some(grade) = fields.grade.as_deref() {
            record = record.with_grade(grade);
        }
        if let Some(gp) = fields.grade_point {
            record = record.with_grade_point(gp);
        }
        if let Some(kind) = fields.course_type.as_deref() {
            record = record.with_course_type(kind);
        }
        Ok(record)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn field_matches<T>(stored: &Option<T>, fetched: &Option<T>, eq: impl Fn(&T, &T) -> bool) -> bool {
    match (stored, fetched) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(a), Some(b)) => eq(a, b),
    }
}

/// Numbers arrive both as JSON numbers and as strings ("3", "3.85", "")
pub(crate) fn number_from_json(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|x| x.is_finite())
}

fn same_number(a: &f64, b: &f64) -> bool {
    (a - b).abs() < 1e-9
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(12) as i32);
    (value * factor).round() / factor
}
