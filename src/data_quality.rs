// ✅ Data Quality Engine - per-record validation against the column dictionary
//
// Every rule registered for a column is checked, plus a few cross-field rules
// the dataset documentation implies (pdays/previous agreement, real calendar days).

use crate::attributes::{AttributeRegistry, AttributeValue, ValidationRule, MONTHS};
use crate::db::{BankRecord, RawRecord, RECORD_FIELDS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rule_name: String,
    pub field: String,
    pub message: String,
    pub confidence: f64,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn pass(rule_name: &str, field: &str, message: &str) -> Self {
        ValidationResult {
            passed: true,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: 1.0,
            severity: Severity::Info,
        }
    }

    pub fn fail(rule_name: &str, field: &str, message: &str, severity: Severity) -> Self {
        ValidationResult {
            passed: false,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: match severity {
                Severity::Critical => 0.0,
                Severity::Warning => 0.5,
                Severity::Info => 0.8,
            },
            severity,
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// "<source_file>:<line>"
    pub record_ref: String,
    pub overall_quality: f64,
    pub overall_confidence: f64,
    pub validations: Vec<ValidationResult>,
    pub issues: Vec<QualityIssue>,
    pub passed_count: usize,
    pub failed_count: usize,
    pub needs_review: bool,
}

impl QualityReport {
    pub fn summary(&self) -> String {
        format!(
            "{}: Quality {:.1}%, Confidence {:.1}%, Issues: {} ({} critical)",
            self.record_ref,
            self.overall_quality * 100.0,
            self.overall_confidence * 100.0,
            self.issues.len(),
            self.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count()
        )
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == Severity::Critical)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub field: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Value missing or unusable
    Warning,  // Value out of the documented range
    Info,     // Value valid but outside the known vocabulary
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_records: usize,
    pub clean_count: usize,
    pub needs_review_count: usize,
    pub critical_issues_count: usize,
    pub average_quality: f64,
    /// Issue count per field, most frequent first
    pub issues_by_field: Vec<(String, usize)>,
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    registry: AttributeRegistry,

    /// Columns checked on raw records (derived columns are produced later)
    fields: Vec<&'static str>,

    /// Minimum confidence threshold for "needs_review"
    review_threshold: f64,
}

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine {
            registry: AttributeRegistry::new(),
            fields: RECORD_FIELDS.to_vec(),
            review_threshold: 0.9,
        }
    }

    fn severity_for(rule: &ValidationRule) -> Severity {
        match rule {
            ValidationRule::Required => Severity::Critical,
            ValidationRule::Range { .. } | ValidationRule::Min(_) => Severity::Warning,
            ValidationRule::OneOf(_) => Severity::Info,
        }
    }

    fn rule_name(field: &str, rule: &ValidationRule) -> String {
        let suffix = match rule {
            ValidationRule::Required => "required",
            ValidationRule::Range { .. } => "range",
            ValidationRule::Min(_) => "min",
            ValidationRule::OneOf(_) => "known_value",
        };
        format!("{}_{}", field, suffix)
    }

    /// Validate one typed record and generate its quality report
    pub fn validate(&self, record: &BankRecord) -> QualityReport {
        self.validate_raw(&RawRecord::from(record))
    }

    /// Validate one row as read from the CSV, including cells that failed conversion
    pub fn validate_raw(&self, record: &RawRecord) -> QualityReport {
        let mut validations = Vec::new();
        let mut issues = Vec::new();

        for field in &self.fields {
            let Some(attr) = self.registry.get_by_name(field) else {
                continue;
            };

            if let Some((_, text)) = record.invalid.iter().find(|(f, _)| f == field) {
                let rule_name = format!("{}_type", field);
                let message = format!("'{}' is not a valid {:?} value", text, attr.type_);
                issues.push(QualityIssue {
                    severity: Severity::Critical,
                    field: field.to_string(),
                    issue: message.clone(),
                    recommendation: format!("Expected a {:?} value", attr.type_),
                });
                validations.push(ValidationResult::fail(&rule_name, field, &message, Severity::Critical));
                continue;
            }

            let value = record.attribute_value(field);

            for rule in &attr.validation_rules {
                let rule_name = Self::rule_name(field, rule);
                match rule.check(&value) {
                    None => validations.push(ValidationResult::pass(&rule_name, field, "ok")),
                    Some(message) => {
                        let severity = Self::severity_for(rule);
                        issues.push(QualityIssue {
                            severity,
                            field: field.to_string(),
                            issue: message.clone(),
                            recommendation: recommendation_for(rule),
                        });
                        validations.push(ValidationResult::fail(&rule_name, field, &message, severity));
                    }
                }
            }
        }

        for result in [
            self.validate_pdays_previous(record),
            self.validate_calendar_day(record),
        ] {
            if !result.passed {
                issues.push(QualityIssue {
                    severity: result.severity,
                    field: result.field.clone(),
                    issue: result.message.clone(),
                    recommendation: "Check the source row against the dataset documentation"
                        .to_string(),
                });
            }
            validations.push(result);
        }

        let passed_count = validations.iter().filter(|v| v.passed).count();
        let failed_count = validations.len() - passed_count;
        let overall_quality = passed_count as f64 / validations.len() as f64;
        let overall_confidence: f64 =
            validations.iter().map(|v| v.confidence).sum::<f64>() / validations.len() as f64;

        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);

        QualityReport {
            record_ref: record.record_ref(),
            overall_quality,
            overall_confidence,
            validations,
            issues,
            passed_count,
            failed_count,
            needs_review: has_critical || overall_confidence < self.review_threshold,
        }
    }

    /// Batch validate multiple records
    pub fn validate_batch(&self, records: &[BankRecord]) -> Vec<QualityReport> {
        records.iter().map(|r| self.validate(r)).collect()
    }

    /// Batch validate rows from `load_raw_csv`
    pub fn validate_raw_batch(&self, records: &[RawRecord]) -> Vec<QualityReport> {
        records.iter().map(|r| self.validate_raw(r)).collect()
    }

    /// Summary statistics for a batch of reports
    pub fn batch_summary(&self, reports: &[QualityReport]) -> BatchSummary {
        let total = reports.len();
        if total == 0 {
            return BatchSummary::default();
        }

        let mut by_field: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for issue in reports.iter().flat_map(|r| r.issues.iter()) {
            *by_field.entry(issue.field.clone()).or_insert(0) += 1;
        }
        let mut issues_by_field: Vec<(String, usize)> = by_field.into_iter().collect();
        issues_by_field.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        BatchSummary {
            total_records: total,
            clean_count: reports.iter().filter(|r| r.issues.is_empty()).count(),
            needs_review_count: reports.iter().filter(|r| r.needs_review).count(),
            critical_issues_count: reports.iter().filter(|r| r.has_critical_issues()).count(),
            average_quality: reports.iter().map(|r| r.overall_quality).sum::<f64>() / total as f64,
            issues_by_field,
        }
    }

    // ========================================================================
    // CROSS-FIELD RULES
    // ========================================================================

    /// pdays = -1 means "never contacted", which implies previous = 0
    fn validate_pdays_previous(&self, record: &RawRecord) -> ValidationResult {
        let (AttributeValue::Integer(pdays), AttributeValue::Integer(previous)) = (
            record.attribute_value("pdays"),
            record.attribute_value("previous"),
        ) else {
            // Missing or malformed cells are already reported per column
            return ValidationResult::pass("pdays_previous_consistent", "pdays", "not checked");
        };

        if (pdays == -1) != (previous == 0) {
            return ValidationResult::fail(
                "pdays_previous_consistent",
                "pdays",
                &format!("pdays = {} disagrees with previous = {}", pdays, previous),
                Severity::Warning,
            );
        }

        ValidationResult::pass("pdays_previous_consistent", "pdays", "ok")
    }

    /// Day must exist in the month (leap year assumed for feb)
    fn validate_calendar_day(&self, record: &RawRecord) -> ValidationResult {
        let (AttributeValue::Integer(day), AttributeValue::Text(month)) = (
            record.attribute_value("day"),
            record.attribute_value("month"),
        ) else {
            return ValidationResult::pass("day_in_month", "day", "not checked");
        };
        let Some(month_index) = MONTHS.iter().position(|m| *m == month) else {
            // Unknown month is already reported by the dictionary rule
            return ValidationResult::pass("day_in_month", "day", "month not checked");
        };

        let valid = u32::try_from(day)
            .ok()
            .and_then(|d| NaiveDate::from_ymd_opt(2008, month_index as u32 + 1, d))
            .is_some();

        if valid {
            ValidationResult::pass("day_in_month", "day", "ok")
        } else {
            ValidationResult::fail(
                "day_in_month",
                "day",
                &format!("{} {} is not a calendar day", day, month),
                Severity::Warning,
            )
        }
    }
}

fn recommendation_for(rule: &ValidationRule) -> String {
    match rule {
        ValidationRule::Required => "Fill in the missing value".to_string(),
        ValidationRule::Range { min, max } => format!("Expected a value in {}..={}", min, max),
        ValidationRule::Min(min) => format!("Expected a value >= {}", min),
        ValidationRule::OneOf(values) => format!("Use one of: {}", values.join(", ")),
    }
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sample_record;

    #[test]
    fn test_clean_record() {
        let engine = DataQualityEngine::new();
        let report = engine.validate(&sample_record(2, 35, "technician", 200, false));

        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(report.failed_count, 0);
        assert_eq!(report.overall_quality, 1.0);
        assert!(!report.needs_review);
        assert_eq!(report.record_ref, "bank.csv:2");
    }

    #[test]
    fn test_unknown_job_is_info() {
        let engine = DataQualityEngine::new();
        let report = engine.validate(&sample_record(2, 35, "astronaut", 200, false));

        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].field, "job");
        assert_eq!(report.issues[0].severity, Severity::Info);
        assert!(!report.has_critical_issues());
    }

    #[test]
    fn test_out_of_range_age_is_warning() {
        let engine = DataQualityEngine::new();
        let report = engine.validate(&sample_record(2, 130, "retired", 200, false));

        let issue = report.issues.iter().find(|i| i.field == "age").unwrap();
        assert_eq!(issue.severity, Severity::Warning);
        assert!(issue.recommendation.contains("18..=100"));
    }

    #[test]
    fn test_blank_required_is_critical() {
        let engine = DataQualityEngine::new();
        let mut record = sample_record(2, 35, "technician", 200, false);
        record.education = String::new();

        let report = engine.validate(&record);

        assert!(report.has_critical_issues());
        assert!(report.needs_review);
    }

    #[test]
    fn test_pdays_previous_disagreement() {
        let engine = DataQualityEngine::new();
        let mut record = sample_record(2, 35, "technician", 200, false);
        record.previous = 3;

        let report = engine.validate(&record);

        assert!(report.issues.iter().any(|i| i.field == "pdays"));
    }

    #[test]
    fn test_calendar_day() {
        let engine = DataQualityEngine::new();
        let mut record = sample_record(2, 35, "technician", 200, false);
        record.month = "feb".to_string();
        record.day = 30;

        let report = engine.validate(&record);
        assert!(report.issues.iter().any(|i| i.issue.contains("not a calendar day")));

        record.day = 29;
        assert!(engine.validate(&record).issues.is_empty());
    }

    #[test]
    fn test_batch_summary() {
        let engine = DataQualityEngine::new();
        let reports = engine.validate_batch(&[
            sample_record(2, 35, "technician", 200, false),
            sample_record(3, 35, "astronaut", 200, false),
            sample_record(4, 35, "pilot", 200, false),
        ]);

        let summary = engine.batch_summary(&reports);

        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.clean_count, 1);
        assert_eq!(summary.critical_issues_count, 0);
        assert_eq!(summary.issues_by_field, vec![("job".to_string(), 2)]);
    }

    #[test]
    fn test_malformed_cells_are_critical_and_batch_is_still_scored() {
        let engine = DataQualityEngine::new();

        let clean = RawRecord::from(&sample_record(2, 35, "technician", 200, false));

        let mut blank_age = RawRecord::from(&sample_record(3, 35, "admin.", 90, true));
        blank_age.values.remove("age");

        let mut bad_duration = RawRecord::from(&sample_record(4, 38, "services", 90, false));
        bad_duration.values.remove("duration");
        bad_duration
            .invalid
            .push(("duration".to_string(), "abc".to_string()));

        let reports = engine.validate_raw_batch(&[clean, blank_age, bad_duration]);
        assert_eq!(reports.len(), 3);

        assert!(reports[0].issues.is_empty(), "{:?}", reports[0].issues);
        assert_eq!(reports[0].record_ref, "bank.csv:2");

        let age = reports[1].issues.iter().find(|i| i.field == "age").unwrap();
        assert_eq!(age.severity, Severity::Critical);
        assert!(reports[1].needs_review);

        let duration = reports[2].issues.iter().find(|i| i.field == "duration").unwrap();
        assert_eq!(duration.severity, Severity::Critical);
        assert!(duration.issue.contains("'abc'"));
        assert!(reports[2]
            .validations
            .iter()
            .any(|v| v.rule_name == "duration_type" && !v.passed));
        assert_eq!(reports[2].record_ref, "bank.csv:4");

        let summary = engine.batch_summary(&reports);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.clean_count, 1);
        assert_eq!(summary.critical_issues_count, 2);
    }

    #[test]
    fn test_batch_summary_empty() {
        let engine = DataQualityEngine::new();
        let summary = engine.batch_summary(&[]);

        assert_eq!(summary.total_records, 0);
        assert_eq!(summary.average_quality, 0.0);
    }
}
