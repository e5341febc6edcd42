//! Insurer-configurable date and age thresholds.
//!
//! Errors block automatic submission; warnings do not. A date that cannot
//! be parsed is a warning, never an error.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};

use crate::pipeline::context::{value_text, CanonicalRecord, RunContext, ValidationResult};
use crate::pipeline::error::PipelineError;
use crate::pipeline::insuree::BusinessRules;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::types::ValidationStatus;

pub struct ValidateBusinessRulesStep {
    today: Option<NaiveDate>,
}

impl ValidateBusinessRulesStep {
    pub fn new() -> Self {
        Self { today: None }
    }

    /// Evaluate rules against a fixed date instead of the current UTC date.
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }
}

impl Default for ValidateBusinessRulesStep {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct RuleFindings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Apply the date and age rules to one record.
pub fn check_record(record: &CanonicalRecord, rules: &BusinessRules, today: NaiveDate) -> RuleFindings {
    let mut findings = RuleFindings::default();

    if let Some(value) = record.effective_date().filter(|v| !value_text(v).is_empty()) {
        match parse_date(value) {
            Some(date) => {
                if (today - date).num_days() > rules.max_past_days {
                    findings.errors.push(format!(
                        "Effective date {date} is more than {} days in the past",
                        rules.max_past_days
                    ));
                }
                if (date - today).num_days() > rules.max_future_days {
                    findings.warnings.push(format!(
                        "Effective date {date} is more than {} days in the future",
                        rules.max_future_days
                    ));
                }
            }
            None => findings
                .warnings
                .push(format!("Cannot parse effective_date: {}", value_text(value))),
        }
    }

    let dob = record.member().and_then(|m| m.get("dob")).filter(|v| !value_text(v).is_empty());
    if let Some(value) = dob {
        match parse_date(value) {
            Some(dob) => {
                let age = (today - dob).num_days().div_euclid(365);
                if age < rules.min_age || age > rules.max_age {
                    findings.errors.push(format!(
                        "Member age {age} outside allowed range [{}-{}]",
                        rules.min_age, rules.max_age
                    ));
                }
            }
            None => findings.warnings.push(format!("Cannot parse DOB: {}", value_text(value))),
        }
    }

    findings
}

/// ISO date, or ISO date-time truncated to its date.
fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

#[async_trait]
impl Step for ValidateBusinessRulesStep {
    fn name(&self) -> &str {
        "validate_business_rules"
    }

    fn description(&self) -> &str {
        "Apply business rules (dates, age, duplicates)"
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let rules = ctx.config.business_rules.clone();

        // Keep positions aligned even if schema validation did not size the list.
        let total = ctx.canonical_records.len();
        while ctx.validation_results.len() < total {
            let row_index = ctx.validation_results.len();
            ctx.validation_results.push(ValidationResult { row_index, ..ValidationResult::default() });
        }

        let mut blocking_errors = 0;
        let mut warnings = 0;

        for (record, result) in ctx.canonical_records.iter().zip(ctx.validation_results.iter_mut()) {
            let findings = check_record(record, &rules, today);
            result.business_status = Some(if !findings.errors.is_empty() {
                blocking_errors += 1;
                ValidationStatus::Failed
            } else if !findings.warnings.is_empty() {
                warnings += 1;
                ValidationStatus::Warning
            } else {
                ValidationStatus::Passed
            });
            result.business_errors = findings.errors;
            result.business_warnings = findings.warnings;
        }

        tracing::info!(total, blocking_errors, warnings, "Business rule validation complete");

        Ok(timer.success(json!({
            "total": total,
            "blocking_errors": blocking_errors,
            "warnings": warnings,
        })))
    }
}
