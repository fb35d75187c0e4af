//! Ledger entity types.
//!
//! Field names serialize in PascalCase so the stored documents line up with
//! the index definitions in `store::indexes`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Document;

// ═══════════════════════════════════════════════════════════
// Tags & users
// ═══════════════════════════════════════════════════════════

/// A tag that can be attached to charges and payments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub criteria: String,
}

/// Denormalized copy of a tag's identity and display name.
///
/// Copied by value when the tag is applied; later edits to the tag entity
/// are not reflected here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagReference {
    pub id: String,
    pub name: String,
}

impl TagReference {
    /// Project a tag onto the reference embedded into documents.
    pub fn from_tag(tag: &Tag) -> Self {
        Self {
            id: tag.id.clone(),
            name: tag.name.clone(),
        }
    }
}

impl std::fmt::Display for TagReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id: {} Name: {}", self.id, self.name)
    }
}

/// The actor recorded in the "updated by" audit block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub user_name: String,
}

// ═══════════════════════════════════════════════════════════
// Charges & payments
// ═══════════════════════════════════════════════════════════

/// A charge posted against a patient's account. `amount` is never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Charge {
    #[serde(skip)]
    pub id: String,
    pub patient_id: String,
    #[serde(rename = "GLAccount")]
    pub gl_account: String,
    #[serde(rename = "GLDepartment")]
    pub gl_department: String,
    pub posted_date: Option<DateTime<Utc>>,
    pub discharge_date: Option<DateTime<Utc>>,
    pub amount: f64,
    pub host_system: String,
    #[serde(default)]
    pub tags: Vec<TagReference>,
}

/// A payment settling a charge. `amount` is always negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payment {
    #[serde(skip)]
    pub id: String,
    pub patient_id: String,
    #[serde(rename = "GLAccount")]
    pub gl_account: String,
    #[serde(rename = "GLDepartment")]
    pub gl_department: String,
    pub posted_date: Option<DateTime<Utc>>,
    pub discharge_date: Option<DateTime<Utc>>,
    pub amount: f64,
    #[serde(rename = "ACH")]
    pub ach: Option<String>,
    #[serde(rename = "ACHReceivedDate")]
    pub ach_received_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<TagReference>,
}

impl Document for Charge {
    const COLLECTION: &'static str = "Charges";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Document for Payment {
    const COLLECTION: &'static str = "Payments";

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tag() -> Tag {
        Tag {
            id: "Tag-MySecretTagId".into(),
            name: "SomeTag".into(),
            criteria: "Some Criteria - Does not matter".into(),
        }
    }

    #[test]
    fn tag_reference_copies_identity_and_name() {
        let tag = sample_tag();
        let reference = TagReference::from_tag(&tag);
        assert_eq!(reference.id, "Tag-MySecretTagId");
        assert_eq!(reference.name, "SomeTag");
    }

    #[test]
    fn tag_reference_is_detached_from_tag() {
        let mut tag = sample_tag();
        let reference = TagReference::from_tag(&tag);
        tag.name = "Renamed".into();
        assert_eq!(reference.name, "SomeTag");
    }

    #[test]
    fn tag_reference_display() {
        let reference = TagReference::from_tag(&sample_tag());
        assert_eq!(reference.to_string(), "Id: Tag-MySecretTagId Name: SomeTag");
    }

    #[test]
    fn charge_serializes_ledger_field_names() {
        let charge = Charge {
            id: "Charge-1".into(),
            patient_id: "Patient7".into(),
            gl_account: "Acct3".into(),
            gl_department: "Dept1".into(),
            posted_date: None,
            discharge_date: None,
            amount: 42.0,
            host_system: "System2".into(),
            tags: vec![],
        };
        let json = serde_json::to_value(&charge).unwrap();
        assert_eq!(json["GLAccount"], "Acct3");
        assert_eq!(json["GLDepartment"], "Dept1");
        assert_eq!(json["PatientId"], "Patient7");
        assert_eq!(json["Amount"], 42.0);
        assert!(json["Tags"].as_array().unwrap().is_empty());
        // Identity lives in document metadata, not the body
        assert!(json.get("Id").is_none());
        assert_eq!(Charge::COLLECTION, "Charges");
    }

    #[test]
    fn payment_serializes_ach_fields() {
        let payment = Payment {
            id: "Payment-1".into(),
            patient_id: "Patient7".into(),
            gl_account: "Acct3".into(),
            gl_department: "Dept1".into(),
            posted_date: None,
            discharge_date: None,
            amount: -42.0,
            ach: None,
            ach_received_date: None,
            tags: vec![],
        };
        let json = serde_json::to_value(&payment).unwrap();
        assert!(json.get("ACHReceivedDate").is_some());
        assert!(json.get("ACH").is_some());
        assert_eq!(Payment::COLLECTION, "Payments");
    }
}
