//! Reference insurer with API calls on both sides of extraction.
//!
//! Policy details are fetched before extraction (`policy_id` comes from the
//! insurer config). After mapping, the canonical records are posted as an
//! endorsement creation request together with any approval letter data.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::pipeline::context::RunContext;
use crate::pipeline::resolver::{common_post_steps, common_pre_steps, Services};
use crate::pipeline::step::Step;
use crate::pipeline::steps::{ApiRequestStep, ExtractDataStep, MapCanonicalStep, RequestBuilder};

pub const CODE: &str = "INSURER_B";

pub const ROLE_ENDORSEMENTS: &str = "endorsements";
pub const ROLE_POLICY_DETAILS: &str = "policy_details";
pub const ROLE_APPROVAL_LETTER: &str = "approval_letter";

pub const POLICY_DETAILS_KEY: &str = "policy_details_api";
pub const ENDORSEMENT_CREATION_KEY: &str = "endorsement_creation_response";

/// Body for `POST {base_url}/api/endorsements`.
pub struct CreateEndorsementRequest;

impl RequestBuilder for CreateEndorsementRequest {
    fn build(&self, ctx: &RunContext) -> Option<Value> {
        let policy_id = ctx
            .scratch(POLICY_DETAILS_KEY)
            .and_then(|details| details.get("id"))
            .cloned()
            .unwrap_or(Value::Null);

        Some(json!({
            "policy_id": policy_id,
            "records": ctx.canonical_records,
            "files_processed": ctx.files.len(),
            "approval_data": ctx.extracted_for_role(ROLE_APPROVAL_LETTER),
        }))
    }
}

pub fn flow(services: &Services) -> Vec<Box<dyn Step>> {
    let base_url = services.settings.api_base_url.as_str();

    let mut steps = common_pre_steps(services);
    steps.push(Box::new(
        ApiRequestStep::new(
            "insurer_b_fetch_policy",
            "Fetch active policy details from Insurer B API",
            "GET",
            "{base_url}/api/policies/{policy_id}",
            services.http.clone(),
        )
        .with_response_key(POLICY_DETAILS_KEY)
        .with_default_base_url(base_url),
    ));
    steps.push(Box::new(ExtractDataStep::new(services.llm.clone())));
    steps.push(Box::new(MapCanonicalStep));
    steps.push(Box::new(
        ApiRequestStep::new(
            "insurer_b_create_endorsement",
            "Create endorsement request via Insurer B API",
            "POST",
            "{base_url}/api/endorsements",
            services.http.clone(),
        )
        .with_request_builder(Arc::new(CreateEndorsementRequest))
        .with_response_key(ENDORSEMENT_CREATION_KEY)
        .with_default_base_url(base_url),
    ));
    steps.extend(common_post_steps(services));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::CanonicalRecord;
    use crate::pipeline::insuree::InsureeConfig;
    use crate::pipeline::types::FileDescriptor;

    #[test]
    fn creation_body_uses_fetched_policy_id() {
        let mut ctx = RunContext::new("b", "i", InsureeConfig::new(CODE, "Insurer B")).with_files(vec![
            FileDescriptor::new("f1", "e.xlsx", ROLE_ENDORSEMENTS),
            FileDescriptor::new("f2", "ok.pdf", ROLE_APPROVAL_LETTER),
        ]);
        ctx.set_scratch(POLICY_DETAILS_KEY, json!({"id": "POL-42", "status": "ACTIVE"}));
        ctx.canonical_records.push(CanonicalRecord(
            json!({"endorsement_type": "ADD_MEMBER"}).as_object().cloned().unwrap(),
        ));
        ctx.extracted_by_role.insert(
            ROLE_APPROVAL_LETTER.into(),
            vec![json!({"approved_by": "HR"}).as_object().cloned().unwrap()],
        );

        let body = CreateEndorsementRequest.build(&ctx).unwrap();
        assert_eq!(body["policy_id"], "POL-42");
        assert_eq!(body["records"][0]["endorsement_type"], "ADD_MEMBER");
        assert_eq!(body["files_processed"], 2);
        assert_eq!(body["approval_data"][0]["approved_by"], "HR");
    }

    #[test]
    fn missing_policy_response_sends_null_id() {
        let ctx = RunContext::new("b", "i", InsureeConfig::new(CODE, "Insurer B"));
        let body = CreateEndorsementRequest.build(&ctx).unwrap();
        assert!(body["policy_id"].is_null());
        assert_eq!(body["approval_data"], json!([]));
    }
}
