//! Typed insurer ("insuree") configuration.
//!
//! The configuration arrives as JSON from the caller and is snapshotted into
//! the audit record unchanged. Keys this crate does not model are kept in
//! `extra` so URL templates can still reference them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::FileFormat;
use crate::config::DEFAULT_MIN_CONFIDENCE;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsureeConfig {
    /// Short insurer code; first key tried by the flow resolver.
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    /// Second key tried by the flow resolver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_type: Option<String>,
    /// Global format override, honoured only for single-file runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_type: Option<String>,
    /// Per-role format override.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub role_formats: IndexMap<String, String>,
    #[serde(default)]
    pub extraction_template: ExtractionTemplate,
    #[serde(default)]
    pub business_rules: BusinessRules,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_roles: Vec<FileRoleSpec>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InsureeConfig {
    pub fn new(code: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE)
    }

    /// Parsed role override; unknown format names are ignored.
    pub fn role_format(&self, role: &str) -> Option<FileFormat> {
        self.role_formats.get(role).and_then(|f| FileFormat::from_str(f))
    }

    /// Parsed global override; unknown format names are ignored.
    pub fn global_format(&self) -> Option<FileFormat> {
        self.format_type.as_deref().and_then(FileFormat::from_str)
    }

    /// String-valued entries usable as URL placeholders.
    pub fn string_values(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("code".to_string(), self.code.clone()),
            ("name".to_string(), self.name.clone()),
        ];
        if let Some(flow_type) = &self.flow_type {
            out.push(("flow_type".to_string(), flow_type.clone()));
        }
        if let Some(format_type) = &self.format_type {
            out.push(("format_type".to_string(), format_type.clone()));
        }
        if let Some(base) = &self.api_base_url {
            out.push(("api_base_url".to_string(), base.clone()));
        }
        for (key, value) in &self.extra {
            if let Value::String(s) = value {
                out.push((key.clone(), s.clone()));
            }
        }
        out
    }

    /// JSON snapshot stored with the audit record.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Column and value mapping rules for canonical mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionTemplate {
    /// Source column to dotted canonical path, e.g. `"Member Name" -> "member.name"`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub column_mappings: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub role_templates: IndexMap<String, RoleTemplate>,
    #[serde(default)]
    pub value_mappings: ValueMappings,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<String>,
}

impl ExtractionTemplate {
    /// Mappings for a role, falling back to the default mappings.
    pub fn mappings_for(&self, role: &str) -> &IndexMap<String, String> {
        self.role_templates
            .get(role)
            .map(|t| &t.column_mappings)
            .unwrap_or(&self.column_mappings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleTemplate {
    #[serde(default)]
    pub column_mappings: IndexMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueMappings {
    /// Upper-case action code to canonical endorsement type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorsement_type: Option<IndexMap<String, String>>,
}

/// Thresholds applied by the business-rule validation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRules {
    #[serde(default = "default_max_past_days")]
    pub max_past_days: i64,
    #[serde(default = "default_max_future_days")]
    pub max_future_days: i64,
    #[serde(default)]
    pub min_age: i64,
    #[serde(default = "default_max_age")]
    pub max_age: i64,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            max_past_days: default_max_past_days(),
            max_future_days: default_max_future_days(),
            min_age: 0,
            max_age: default_max_age(),
        }
    }
}

fn default_max_past_days() -> i64 {
    90
}

fn default_max_future_days() -> i64 {
    30
}

fn default_max_age() -> i64 {
    75
}

/// A file role an insurer expects in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRoleSpec {
    pub role: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub accepted_formats: Vec<String>,
}
