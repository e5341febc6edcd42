//! Reference multi-file insurer.
//!
//! A batch carries an employee roster (`member_data`) and a list of
//! add/remove/modify actions (`endorsement_actions`). After extraction the
//! actions are sent to the insurer's member lookup API.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::pipeline::context::RunContext;
use crate::pipeline::resolver::{common_post_steps, common_pre_steps, Services};
use crate::pipeline::step::Step;
use crate::pipeline::steps::{ApiRequestStep, ExtractDataStep, MapCanonicalStep, RequestBuilder};

pub const CODE: &str = "INSURER_A";

pub const ROLE_MEMBER_DATA: &str = "member_data";
pub const ROLE_ENDORSEMENT_ACTIONS: &str = "endorsement_actions";

pub const MEMBER_LOOKUP_RESPONSE_KEY: &str = "member_lookup_response";

/// Body for `POST {base_url}/api/members/lookup`.
pub struct MemberLookupRequest;

impl RequestBuilder for MemberLookupRequest {
    fn build(&self, ctx: &RunContext) -> Option<Value> {
        let members: Vec<Value> = ctx
            .extracted_for_role(ROLE_ENDORSEMENT_ACTIONS)
            .iter()
            .map(|record| {
                json!({
                    "name": record.get("name").cloned().unwrap_or(Value::Null),
                    "employee_id": record.get("employee_id").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        Some(json!({
            "members": members,
            "roster_count": ctx.extracted_for_role(ROLE_MEMBER_DATA).len(),
        }))
    }
}

pub fn flow(services: &Services) -> Vec<Box<dyn Step>> {
    let mut steps = common_pre_steps(services);
    steps.push(Box::new(ExtractDataStep::new(services.llm.clone())));
    steps.push(Box::new(
        ApiRequestStep::new(
            "insurer_a_member_lookup",
            "Call Insurer A member lookup API to enrich records",
            "POST",
            "{base_url}/api/members/lookup",
            services.http.clone(),
        )
        .with_request_builder(Arc::new(MemberLookupRequest))
        .with_response_key(MEMBER_LOOKUP_RESPONSE_KEY)
        .with_default_base_url(&services.settings.api_base_url),
    ));
    steps.push(Box::new(MapCanonicalStep));
    steps.extend(common_post_steps(services));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::insuree::InsureeConfig;
    use crate::pipeline::types::RawRecord;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn lookup_body_lists_action_members_and_counts_roster() {
        let mut ctx = RunContext::new("b", "i", InsureeConfig::new(CODE, "Insurer A"));
        ctx.extracted_by_role.insert(
            ROLE_ENDORSEMENT_ACTIONS.into(),
            vec![
                record(json!({"name": "Asha", "employee_id": "E1", "action": "ADD"})),
                record(json!({"name": "Ravi"})),
            ],
        );
        ctx.extracted_by_role.insert(
            ROLE_MEMBER_DATA.into(),
            vec![record(json!({"name": "x"})), record(json!({"name": "y"})), record(json!({"name": "z"}))],
        );

        let body = MemberLookupRequest.build(&ctx).unwrap();
        assert_eq!(
            body,
            json!({
                "members": [
                    {"name": "Asha", "employee_id": "E1"},
                    {"name": "Ravi", "employee_id": null},
                ],
                "roster_count": 3,
            })
        );
    }

    #[test]
    fn empty_batch_still_builds_a_body() {
        let ctx = RunContext::new("b", "i", InsureeConfig::new(CODE, "Insurer A"));
        let body = MemberLookupRequest.build(&ctx).unwrap();
        assert_eq!(body["members"], json!([]));
        assert_eq!(body["roster_count"], 0);
    }
}
