//! ABHI (Aditya Birla Health Insurance).
//!
//! A batch carries a structured XLS/XLSX endorsement sheet and, optionally,
//! the endorsement schedule PDF.

pub mod prompts;
pub mod steps;

use indexmap::IndexMap;

use crate::pipeline::insuree::{BusinessRules, FileRoleSpec, InsureeConfig};
use crate::pipeline::resolver::{common_post_steps, common_pre_steps, Services};
use crate::pipeline::step::Step;
use crate::pipeline::steps::MapCanonicalStep;
use crate::pipeline::types::FileFormat;

pub use steps::{AbhiExtractStep, AbhiExtractor};

pub const CODE: &str = "ABHI";
pub const NAME: &str = "Aditya Birla Health Insurance";

pub const ROLE_ENDORSEMENT_DATA: &str = "endorsement_data";
pub const ROLE_ENDORSEMENT_PDF: &str = "endorsement_pdf";

/// Download, detect, ABHI extract, map, then the common post steps.
pub fn flow(services: &Services) -> Vec<Box<dyn Step>> {
    let mut steps = common_pre_steps(services);
    steps.push(Box::new(AbhiExtractStep::new(services.llm.clone())));
    steps.push(Box::new(MapCanonicalStep));
    steps.extend(common_post_steps(services));
    steps
}

/// Configuration used when the caller supplies no ABHI-specific overrides.
pub fn default_config() -> InsureeConfig {
    let mut config = InsureeConfig::new(CODE, NAME);

    config.file_roles = vec![
        FileRoleSpec {
            role: ROLE_ENDORSEMENT_DATA.into(),
            required: true,
            description: "Structured XLS/XLSX endorsement sheet".into(),
            accepted_formats: vec![FileFormat::StructuredXlsx.as_str().into()],
        },
        FileRoleSpec {
            role: ROLE_ENDORSEMENT_PDF.into(),
            required: false,
            description: "Endorsement PDF document (LLM extraction)".into(),
            accepted_formats: vec![
                FileFormat::SemiStructuredPdf.as_str().into(),
                FileFormat::UnstructuredPdf.as_str().into(),
            ],
        },
    ];

    config.role_formats = IndexMap::from([
        (ROLE_ENDORSEMENT_DATA.to_string(), FileFormat::StructuredXlsx.as_str().to_string()),
        (ROLE_ENDORSEMENT_PDF.to_string(), FileFormat::SemiStructuredPdf.as_str().to_string()),
    ]);

    let actions = [
        ("ADD", "ADD_MEMBER"),
        ("DEL", "REMOVE_MEMBER"),
        ("DELETE", "REMOVE_MEMBER"),
        ("MOD", "CHANGE_DETAILS"),
        ("MODIFY", "CHANGE_DETAILS"),
        ("SI_CHANGE", "CHANGE_SUM_INSURED"),
    ];
    config.extraction_template.value_mappings.endorsement_type = Some(
        actions
            .iter()
            .map(|(code, kind)| (code.to_string(), kind.to_string()))
            .collect(),
    );
    config.extraction_template.required_fields =
        vec!["name".into(), "employee_id".into(), "action".into()];

    config.min_confidence = Some(0.80);
    config.business_rules = BusinessRules {
        max_past_days: 90,
        max_future_days: 30,
        min_age: 0,
        max_age: 100,
    };
    config
}
