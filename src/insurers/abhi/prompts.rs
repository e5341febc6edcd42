//! Prompts for ABHI endorsement PDFs.

/// Field list for the "Endorsement Schedule cum Tax Invoice" document.
pub const ENDORSEMENT_PDF_PROMPT: &str = r#"Read the attached "Endorsement Schedule cum Tax Invoice" and return its header fields.

Rules:
1. Copy each value as printed on the document.
2. Join a multi-line address into one line separated by single spaces.
3. Return both ends of the "Period of Insurance".
4. Use null for any field you cannot find.
5. Reply with one JSON object and nothing else.

Keys and the label each one comes from:
- "endorsement_number": Endorsement Number
- "date_of_issue": Date of Issue
- "effective_date_time": Endorsement Effective Date & Time
- "request_date": Endorsement Request date
- "policy_number": Policy No
- "policy_holder_name": Name of Policy Holder
- "address": Address
- "policy_holder_gstin": Policy Holder GSTIN
- "period_from": Period of Insurance, From
- "period_to": Period of Insurance, To"#;

pub const SYSTEM_PROMPT: &str = "You extract structured data from Aditya Birla Health Insurance \
(ABHI) endorsement documents. Reply with plain JSON only: no prose, no markdown and no code fences.";
