//! Raw records to canonical endorsements.
//!
//! Column mappings come from the role's template, else the default template.
//! With no mappings at all the raw record is carried over as-is. A bad row
//! is dropped and logged; it never fails the batch.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::pipeline::context::{value_text, CanonicalRecord, RunContext};
use crate::pipeline::error::PipelineError;
use crate::pipeline::step::{Step, StepResult, StepTimer};
use crate::pipeline::types::{EndorsementType, RawRecord, PRIMARY_ROLE};

/// Identity fields gathered into `member` when the mapping produced none.
const MEMBER_FIELDS: [&str; 5] = ["name", "employee_id", "dob", "gender", "relationship"];

pub struct MapCanonicalStep;

#[async_trait]
impl Step for MapCanonicalStep {
    fn name(&self) -> &str {
        "map_canonical"
    }

    fn description(&self) -> &str {
        "Map extracted data to canonical endorsement schema"
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<StepResult, PipelineError> {
        let timer = StepTimer::start(self.name(), self.description());

        if ctx.raw_extracted.is_empty() {
            tracing::warn!(execution_id = %ctx.execution_id, "No raw records to map");
            ctx.canonical_records.clear();
            return Ok(timer.success(json!({ "records_mapped": 0 })));
        }

        let template = &ctx.config.extraction_template;
        let action_map = template.value_mappings.endorsement_type.as_ref();

        let mut canonical = Vec::with_capacity(ctx.raw_extracted.len());
        let mut by_role: IndexMap<String, usize> = IndexMap::new();
        let mut failures = Vec::new();

        for (idx, raw) in ctx.raw_extracted.iter().enumerate() {
            let role = raw
                .get("_source_role")
                .and_then(Value::as_str)
                .unwrap_or(PRIMARY_ROLE)
                .to_string();
            let mappings = template.mappings_for(&role);

            match map_record(raw, mappings, action_map, idx) {
                Ok(mut record) => {
                    record.insert("_source_role".into(), Value::String(role.clone()));
                    canonical.push(CanonicalRecord(record));
                    *by_role.entry(role).or_default() += 1;
                }
                Err(e) => {
                    tracing::warn!(row_index = idx, source_role = %role, error = %e, "Failed to map record, skipping");
                    failures.push(format!("Row {idx}: mapping failed: {e}"));
                }
            }
        }

        let input = ctx.raw_extracted.len();
        let mapped = canonical.len();
        ctx.canonical_records = canonical;
        for failure in failures {
            ctx.add_error(failure);
        }

        tracing::info!(input_records = input, mapped_records = mapped, skipped = input - mapped, "Canonical mapping complete");

        Ok(timer.success(json!({
            "input_records": input,
            "mapped_records": mapped,
            "skipped": input - mapped,
            "by_role": by_role,
        })))
    }
}

/// Map one raw record. `row_index` is its position in the flat raw list.
pub fn map_record(
    raw: &RawRecord,
    mappings: &IndexMap<String, String>,
    action_map: Option<&IndexMap<String, String>>,
    row_index: usize,
) -> Result<Map<String, Value>, PipelineError> {
    let mut mapped = if mappings.is_empty() {
        raw.clone()
    } else {
        let mut mapped = Map::new();
        for (source, target) in mappings {
            if let Some(value) = raw.get(source) {
                set_nested(&mut mapped, target, value.clone())?;
            }
        }
        mapped
    };

    let action = [mapped.get("endorsement_type"), mapped.get("action"), raw.get("action")]
        .into_iter()
        .flatten()
        .map(value_text)
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default();
    let endorsement_type = normalize_action(&action, action_map);
    mapped.insert("endorsement_type".into(), Value::String(endorsement_type));

    if !mapped.contains_key("member") {
        let mut member = Map::new();
        for field in MEMBER_FIELDS {
            let value = mapped
                .remove(field)
                .or_else(|| raw.get(field).cloned())
                .unwrap_or_else(|| if field == "name" { json!("") } else { Value::Null });
            member.insert(field.to_string(), value);
        }
        mapped.insert("member".into(), Value::Object(member));
    }

    mapped.insert("_row_index".into(), json!(row_index));
    let confidence = raw.get("_confidence").cloned().unwrap_or(json!(1.0));
    mapped.insert("_confidence".into(), confidence);

    Ok(mapped)
}

/// Upper-cased, trimmed action code to canonical type name; unknown codes
/// become `CHANGE_DETAILS`.
pub fn normalize_action(action: &str, action_map: Option<&IndexMap<String, String>>) -> String {
    let code = action.trim().to_uppercase();
    let mapped = match action_map {
        Some(map) => map.get(&code).cloned(),
        None => EndorsementType::from_action_code(&code).map(|t| t.as_str().to_string()),
    };
    mapped
        .or_else(|| EndorsementType::from_str(&code).map(|t| t.as_str().to_string()))
        .unwrap_or_else(|| EndorsementType::ChangeDetails.as_str().to_string())
}

/// Set `value` at a dotted path, creating intermediate objects.
pub fn set_nested(target: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), PipelineError> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let last = parts.pop().unwrap_or(path);

    let mut current = target;
    for part in parts {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match slot {
            Value::Object(map) => map,
            other => {
                return Err(PipelineError::mapping(format!(
                    "Cannot set '{path}': '{part}' already holds {other}"
                )));
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::insuree::{InsureeConfig, RoleTemplate};

    fn raw(v: Value) -> RawRecord {
        v.as_object().cloned().unwrap()
    }

    fn mappings(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(a, b)| (a.to_string(), b.to_string())).collect()
    }

    #[test]
    fn nested_paths_are_created() {
        let m = mappings(&[("Member Name", "member.name"), ("Emp", "member.employee_id"), ("Type", "action")]);
        let out = map_record(&raw(json!({"Member Name": "Asha", "Emp": "E1", "Type": " del "})), &m, None, 4).unwrap();
        assert_eq!(out["member"]["name"], "Asha");
        assert_eq!(out["member"]["employee_id"], "E1");
        assert_eq!(out["endorsement_type"], "REMOVE_MEMBER");
        assert_eq!(out["_row_index"], 4);
        assert_eq!(out["_confidence"], 1.0);
    }

    #[test]
    fn conflicting_path_is_mapping_error() {
        let m = mappings(&[("a", "member"), ("b", "member.name")]);
        let err = map_record(&raw(json!({"a": "flat", "b": "x"})), &m, None, 0).unwrap_err();
        assert_eq!(err.kind(), "Mapping");
    }

    #[test]
    fn member_assembled_from_flat_fields() {
        let out = map_record(
            &raw(json!({"name": "Ravi", "employee_id": "E2", "action": "ADD", "dob": "1990-01-01", "_confidence": 0.6})),
            &IndexMap::new(),
            None,
            0,
        )
        .unwrap();
        assert_eq!(out["member"]["name"], "Ravi");
        assert_eq!(out["member"]["gender"], Value::Null);
        assert!(!out.contains_key("name"));
        assert_eq!(out["endorsement_type"], "ADD_MEMBER");
        assert_eq!(out["_confidence"], 0.6);
    }

    #[test]
    fn missing_name_defaults_to_empty() {
        let out = map_record(&raw(json!({"action": "ADD"})), &IndexMap::new(), None, 0).unwrap();
        assert_eq!(out["member"]["name"], "");
    }

    #[test]
    fn action_normalization() {
        assert_eq!(normalize_action("si_change", None), "CHANGE_SUM_INSURED");
        assert_eq!(normalize_action("", None), "CHANGE_DETAILS");
        assert_eq!(normalize_action("SOMETHING", None), "CHANGE_DETAILS");
        assert_eq!(normalize_action("ADD_MEMBER", None), "ADD_MEMBER");

        let custom = mappings(&[("JOIN", "ADD_MEMBER")]);
        assert_eq!(normalize_action("join", Some(&custom)), "ADD_MEMBER");
        // A custom table replaces the built-in codes.
        assert_eq!(normalize_action("ADD", Some(&custom)), "CHANGE_DETAILS");
    }

    #[tokio::test]
    async fn role_templates_and_bad_rows() {
        let mut config = InsureeConfig::new("X", "X");
        config.extraction_template.column_mappings = mappings(&[("Name", "member.name")]);
        config.extraction_template.role_templates.insert(
            "letter".into(),
            RoleTemplate { column_mappings: mappings(&[("Holder", "policy_holder")]) },
        );
        config.extraction_template.role_templates.insert(
            "broken".into(),
            RoleTemplate { column_mappings: mappings(&[("x", "a"), ("y", "a.b")]) },
        );

        let mut ctx = RunContext::new("b", "i", config);
        ctx.extracted_by_role.insert("data".into(), vec![raw(json!({"Name": "Asha", "Action": "ADD"}))]);
        ctx.extracted_by_role.insert("letter".into(), vec![raw(json!({"Holder": "ACME"}))]);
        ctx.extracted_by_role.insert("broken".into(), vec![raw(json!({"x": 1, "y": 2}))]);
        ctx.merge_extracted_to_flat();

        let result = MapCanonicalStep.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.canonical_records.len(), 2);
        assert_eq!(ctx.canonical_records[0].member_text("name"), "Asha");
        assert_eq!(ctx.canonical_records[0].source_role(), Some("data"));
        assert_eq!(ctx.canonical_records[1].get("policy_holder").unwrap(), "ACME");
        assert_eq!(ctx.errors.len(), 1);
        assert!(ctx.errors[0].starts_with("Row 2: mapping failed"));
        assert_eq!(result.metadata["skipped"], 1);
        assert_eq!(result.metadata["by_role"]["letter"], 1);
    }

    #[tokio::test]
    async fn empty_input_maps_nothing() {
        let mut ctx = RunContext::new("b", "i", InsureeConfig::new("X", "X"));
        let result = MapCanonicalStep.execute(&mut ctx).await.unwrap();
        assert_eq!(result.metadata["records_mapped"], 0);
    }
}
