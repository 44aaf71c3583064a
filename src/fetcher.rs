// 📥 Fetchers - produce a validated grade snapshot or fail
// Malformed entries are dropped here; the reconciler only ever sees
// records with both identity fields present.

use crate::error::FetchError;
use crate::record::{number_from_json, GradeRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// FETCHER TRAIT
// ============================================================================

/// Source of one grade snapshot per run
pub trait Fetcher {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Fetch the current snapshot (records in source order)
    fn fetch(&self) -> Result<Vec<GradeRecord>, FetchError>;
}

/// Which on-disk shape a snapshot file has
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotFormat {
    /// Decide by file extension (`.csv` → CSV, anything else → portal JSON)
    #[default]
    Auto,
    PortalJson,
    Csv,
}

impl SnapshotFormat {
    pub fn resolve(self, path: &Path) -> SnapshotFormat {
        match self {
            SnapshotFormat::Auto => {
                let is_csv = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false);
                if is_csv {
                    SnapshotFormat::Csv
                } else {
                    SnapshotFormat::PortalJson
                }
            }
            other => other,
        }
    }
}

/// Build the fetcher matching a snapshot file
pub fn open_fetcher(path: &Path, format: SnapshotFormat) -> Box<dyn Fetcher> {
    match format.resolve(path) {
        SnapshotFormat::Csv => Box::new(CsvFetcher::new(path)),
        _ => Box::new(PortalDumpFetcher::new(path)),
    }
}

// ============================================================================
// PORTAL DUMP (score query response saved as JSON)
// ============================================================================

/// Reads a saved score-query response:
/// `{"success": true, "cjxx": [{"xq": term, "list": [{"bkcjbh", "kcmc", "xqcj", "jd", "xf", "kctx"}]}]}`
pub struct PortalDumpFetcher {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct PortalResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    cjxx: Option<Vec<PortalTerm>>,
}

#[derive(Debug, Deserialize)]
struct PortalTerm {
    #[serde(default)]
    xq: serde_json::Value,
    #[serde(default)]
    list: Vec<serde_json::Value>,
}

impl PortalDumpFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PortalDumpFetcher { path: path.into() }
    }
}

impl Fetcher for PortalDumpFetcher {
    fn describe(&self) -> String {
        format!("portal dump {}", self.path.display())
    }

    fn fetch(&self) -> Result<Vec<GradeRecord>, FetchError> {
        let content = fs::read_to_string(&self.path).map_err(|e| FetchError::Source {
            path: self.path.clone(),
            source: e,
        })?;
        parse_portal_response(&content)
    }
}

/// Parse a score-query response body into validated records
pub fn parse_portal_response(body: &str) -> Result<Vec<GradeRecord>, FetchError> {
    let response: PortalResponse = serde_json::from_str(body)
        .map_err(|e| FetchError::UnexpectedShape(format!("response is not JSON: {}", e)))?;

    if response.success == Some(false) {
        return Err(FetchError::Auth(
            response
                .msg
                .unwrap_or_else(|| "portal reported success=false".to_string()),
        ));
    }

    let terms = response
        .cjxx
        .ok_or_else(|| FetchError::UnexpectedShape("missing `cjxx` term list".to_string()))?;

    let mut records = Vec::new();
    let mut total = 0usize;
    let mut skipped = 0usize;

    for term in terms {
        let semester = text_from_json(&term.xq).unwrap_or_default();
        for entry in &term.list {
            total += 1;
            match portal_entry_to_record(entry, &semester) {
                Some(record) => records.push(record),
                None => skipped += 1,
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, total, "portal entries without course id or term were skipped");
    }
    info!(valid = records.len(), total, "parsed portal score response");
    Ok(records)
}

fn portal_entry_to_record(entry: &serde_json::Value, semester: &str) -> Option<GradeRecord> {
    let field = |name: &str| entry.get(name).and_then(text_from_json).unwrap_or_default();

    let mut record = GradeRecord::new(&field("bkcjbh"), semester)
        .ok()?
        .with_course_name(&field("kcmc"))
        .with_grade(&field("xqcj"))
        .with_course_type(&field("kctx"));

    if let Some(credit) = entry.get("xf").and_then(number_from_json) {
        record = record.with_credit(credit);
    }
    if let Some(gpa) = entry.get("jd").and_then(number_from_json) {
        record = record.with_grade_point(gpa);
    }
    Some(record)
}

/// Strings and numbers both render as text ("92" and 92 are the same grade)
fn text_from_json(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// CSV EXPORT
// ============================================================================

/// Reads a CSV export with a header row:
/// `course_id,semester,course_name,credit,grade,grade_point,course_type`
pub struct CsvFetcher {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    course_id: Option<String>,
    semester: Option<String>,
    #[serde(default)]
    course_name: Option<String>,
    #[serde(default)]
    credit: Option<String>,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    grade_point: Option<String>,
    #[serde(default)]
    course_type: Option<String>,
}

impl CsvRow {
    fn into_record(self) -> Option<GradeRecord> {
        let text = |v: Option<String>| v.unwrap_or_default();
        let number = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<f64>().ok());

        let credit = number(&self.credit);
        let grade_point = number(&self.grade_point);

        let mut record = GradeRecord::new(
            self.course_id.as_deref().unwrap_or(""),
            self.semester.as_deref().unwrap_or(""),
        )
        .ok()?
        .with_course_name(&text(self.course_name))
        .with_grade(&text(self.grade))
        .with_course_type(&text(self.course_type));

        if let Some(credit) = credit {
            record = record.with_credit(credit);
        }
        if let Some(gp) = grade_point {
            record = record.with_grade_point(gp);
        }
        Some(record)
    }
}

impl CsvFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvFetcher { path: path.into() }
    }

    fn csv_error(&self, e: csv::Error) -> FetchError {
        if e.is_io_error() {
            if let csv::ErrorKind::Io(io) = e.into_kind() {
                return FetchError::Source {
                    path: self.path.clone(),
                    source: io,
                };
            }
            return FetchError::UnexpectedShape("csv I/O error".to_string());
        }
        FetchError::UnexpectedShape(format!("csv: {}", e))
    }
}

impl Fetcher for CsvFetcher {
    fn describe(&self) -> String {
        format!("csv export {}", self.path.display())
    }

    fn fetch(&self) -> Result<Vec<GradeRecord>, FetchError> {
        let mut rdr = csv::Reader::from_path(&self.path).map_err(|e| self.csv_error(e))?;

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (index, row) in rdr.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| self.csv_error(e))?;
            match row.into_record() {
                Some(record) => records.push(record),
                None => {
                    skipped += 1;
                    warn!(line = index + 2, "csv row without course_id or semester skipped");
                }
            }
        }

        info!(valid = records.len(), skipped, path = %self.path.display(), "parsed csv snapshot");
        Ok(records)
    }
}

// ============================================================================
// STATIC SNAPSHOT
// ============================================================================

/// Serves a fixed snapshot (dry runs and tests)
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    records: Vec<GradeRecord>,
}

impl StaticFetcher {
    pub fn new(records: Vec<GradeRecord>) -> Self {
        StaticFetcher { records }
    }
}

impl Fetcher for StaticFetcher {
    fn describe(&self) -> String {
        format!("static snapshot ({} records)", self.records.len())
    }

    fn fetch(&self) -> Result<Vec<GradeRecord>, FetchError> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PORTAL_BODY: &str = r#"{
        "success": true,
        "cjxx": [
            {"xq": "23-24学年第2学期", "list": [
                {"bkcjbh": "CS101", "kcmc": "Intro to CS", "xqcj": "92", "jd": "3.85", "xf": "3", "kctx": "Required"},
                {"bkcjbh": "PE100", "kcmc": "Swimming", "xqcj": "合格", "jd": "", "xf": 1},
                {"bkcjbh": "", "kcmc": "Ghost row", "xqcj": "80"}
            ]},
            {"xq": "24-25学年第1学期", "list": [
                {"bkcjbh": 20231, "kcmc": "Numeric id", "xqcj": 88}
            ]}
        ]
    }"#;

    #[test]
    fn test_parse_portal_response_keeps_valid_entries() {
        let records = parse_portal_response(PORTAL_BODY).unwrap();
        assert_eq!(records.len(), 3);

        let cs = &records[0];
        assert_eq!(cs.course_id(), "CS101");
        assert_eq!(cs.semester(), "23-24学年第2学期");
        assert_eq!(cs.grade(), Some("92"));
        assert_eq!(cs.grade_point(), Some(3.85));
        assert_eq!(cs.credit(), Some(3.0));
        assert_eq!(cs.course_type(), Some("Required"));

        let pe = &records[1];
        assert_eq!(pe.grade(), Some("合格"));
        assert_eq!(pe.grade_point(), None);
        assert_eq!(pe.credit(), Some(1.0));

        let numeric = &records[2];
        assert_eq!(numeric.course_id(), "20231");
        assert_eq!(numeric.grade(), Some("88"));
    }

    #[test]
    fn test_portal_failure_flag_is_auth_error() {
        let err = parse_portal_response(r#"{"success": false, "msg": "token expired"}"#).unwrap_err();
        assert!(matches!(err, FetchError::Auth(ref m) if m == "token expired"));
    }

    #[test]
    fn test_portal_shape_errors() {
        assert!(matches!(
            parse_portal_response("<html>login</html>"),
            Err(FetchError::UnexpectedShape(_))
        ));
        assert!(matches!(
            parse_portal_response(r#"{"success": true}"#),
            Err(FetchError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_entries_without_term_are_skipped() {
        let records = parse_portal_response(
            r#"{"cjxx": [{"list": [{"bkcjbh": "CS101", "xqcj": "A"}]}]}"#,
        )
        .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_dump_is_source_error() {
        let dir = TempDir::new().unwrap();
        let fetcher = PortalDumpFetcher::new(dir.path().join("current.json"));
        assert!(matches!(fetcher.fetch(), Err(FetchError::Source { .. })));
    }

    #[test]
    fn test_csv_fetcher_reads_rows_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grades.csv");
        fs::write(
            &path,
            "course_id,semester,course_name,credit,grade,grade_point,course_type\n\
             CS101,2024S,Intro,3,A,4.0,Required\n\
             ,2024S,No id,2,B,,\n\
             MA201,2024S,Linear Algebra,4,B+,,\n",
        )
        .unwrap();

        let fetcher = open_fetcher(&path, SnapshotFormat::Auto);
        let records = fetcher.fetch().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].grade_point(), Some(4.0));
        assert_eq!(records[1].course_name(), Some("Linear Algebra"));
        assert_eq!(records[1].grade_point(), None);
        assert_eq!(records[1].credit(), Some(4.0));
    }

    #[test]
    fn test_format_resolution() {
        assert_eq!(
            SnapshotFormat::Auto.resolve(Path::new("export.CSV")),
            SnapshotFormat::Csv
        );
        assert_eq!(
            SnapshotFormat::Auto.resolve(Path::new("current.json")),
            SnapshotFormat::PortalJson
        );
        assert_eq!(
            SnapshotFormat::Csv.resolve(Path::new("current.json")),
            SnapshotFormat::Csv
        );
    }
}
