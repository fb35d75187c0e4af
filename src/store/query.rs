//! Structured index queries and the tag patch-by-query built on them.
//!
//! Queries are kept as data rather than text: the HTTP store renders them to
//! the server's query language, while the in-memory store evaluates them
//! directly against document bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::types::StoredDocument;
use crate::records::{TagReference, User};

/// Index field holding the identities of a document's tags.
pub const TAG_IDS_FIELD: &str = "TagIds";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    LessThan { field: String, value: f64 },
    /// True when the field holds none of `values`.
    NotContainsAny { field: String, values: Vec<String> },
}

/// A query against one index, combining clauses with AND.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexQuery {
    pub index: String,
    /// Collection the index maps over.
    pub collection: String,
    pub clauses: Vec<Clause>,
}

impl IndexQuery {
    pub fn for_index(index: &str, collection: &str) -> Self {
        Self {
            index: index.to_string(),
            collection: collection.to_string(),
            clauses: Vec::new(),
        }
    }

    pub fn where_less_than(mut self, field: &str, value: f64) -> Self {
        self.clauses.push(Clause::LessThan {
            field: field.to_string(),
            value,
        });
        self
    }

    pub fn and_not_contains_any(mut self, field: &str, values: Vec<String>) -> Self {
        self.clauses.push(Clause::NotContainsAny {
            field: field.to_string(),
            values,
        });
        self
    }

    /// Render as query text plus named parameters (`$p0`, `$p1`, ...).
    pub fn to_rql(&self) -> (String, Map<String, Value>) {
        let mut params = Map::new();
        let mut text = format!("from index '{}'", self.index);

        for (i, clause) in self.clauses.iter().enumerate() {
            let name = format!("p{i}");
            let joiner = if i == 0 { " where " } else { " and " };
            text.push_str(joiner);
            match clause {
                Clause::LessThan { field, value } => {
                    text.push_str(&format!("{field} < ${name}"));
                    params.insert(name, json!(value));
                }
                Clause::NotContainsAny { field, values } => {
                    // A leading negation needs a positive operand to negate from
                    if i == 0 {
                        text.push_str("true and ");
                    }
                    text.push_str(&format!("not {field} in (${name})"));
                    params.insert(name, json!(values));
                }
            }
        }

        (text, params)
    }

    /// Evaluate the query against a stored document.
    pub fn matches(&self, doc: &StoredDocument) -> bool {
        if doc.collection != self.collection {
            return false;
        }
        self.clauses.iter().all(|clause| match clause {
            Clause::LessThan { field, value } => field_values(&doc.body, field)
                .iter()
                .any(|v| v.as_f64().is_some_and(|n| n < *value)),
            Clause::NotContainsAny { field, values } => !field_values(&doc.body, field)
                .iter()
                .filter_map(Value::as_str)
                .any(|v| values.iter().any(|wanted| wanted == v)),
        })
    }
}

/// Values an index would project for `field`. `TagIds` is derived from the
/// `Tags` array; every other field maps straight onto the body.
fn field_values(body: &Value, field: &str) -> Vec<Value> {
    if field == TAG_IDS_FIELD {
        return body
            .get("Tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(|t| t.get("Id").cloned()).collect())
            .unwrap_or_default();
    }
    body.get(field).cloned().into_iter().collect()
}

// ═══════════════════════════════════════════════════════════
// Tag patch
// ═══════════════════════════════════════════════════════════

/// Format a UTC instant the way the audit block stores it: sortable, with
/// seven fractional digits (`2019-04-30T13:45:07.1234567Z`).
pub fn format_audit_timestamp(at: DateTime<Utc>) -> String {
    let ticks = at.timestamp_subsec_nanos() / 100;
    format!("{}.{ticks:07}Z", at.format("%Y-%m-%dT%H:%M:%S"))
}

/// Mutation applied to every document matched by a patch-by-query: append a
/// tag (once per tag identity) and stamp the audit block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPatch {
    pub tag: TagReference,
    pub actor: User,
    pub stamped_at: String,
}

const ADD_TAG_SCRIPT: &str = "declare function addTag(currentTags, newTag) {
    let tags = currentTags || [];
    if (!tags.some(t => t.Id === newTag.Id)) {
        tags.push(newTag);
    }
    return tags;
}";

impl TagPatch {
    pub fn new(tag: TagReference, actor: User, at: DateTime<Utc>) -> Self {
        Self {
            tag,
            actor,
            stamped_at: format_audit_timestamp(at),
        }
    }

    /// The `update { ... }` block; values are passed as parameters.
    fn update_block(&self) -> &'static str {
        "update {
    this.Tags = addTag(this.Tags, $tag);
    this.UpdatedBy = this.UpdatedBy || {};
    this.UpdatedBy.Id = $actorId;
    this.UpdatedBy.Name = $actorName;
    this.UpdatedBy.UserName = $actorUserName;
    this.UpdatedOnUTC = $stampedAt;
}"
    }

    fn parameters(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("tag".into(), json!(self.tag));
        params.insert("actorId".into(), json!(self.actor.id));
        params.insert("actorName".into(), json!(self.actor.name));
        params.insert("actorUserName".into(), json!(self.actor.user_name));
        params.insert("stampedAt".into(), json!(self.stamped_at));
        params
    }

    /// Apply the patch to a document body. Returns true when the tag was
    /// appended (false when the document already carried it).
    pub fn apply(&self, body: &mut Value) -> bool {
        let Some(obj) = body.as_object_mut() else {
            return false;
        };

        let tags = obj.entry("Tags").or_insert_with(|| Value::Array(Vec::new()));
        if !tags.is_array() {
            *tags = Value::Array(Vec::new());
        }
        let mut appended = false;
        if let Some(list) = tags.as_array_mut() {
            let present = list
                .iter()
                .any(|t| t.get("Id").and_then(Value::as_str) == Some(self.tag.id.as_str()));
            if !present {
                list.push(json!(self.tag));
                appended = true;
            }
        }

        let updated_by = obj.entry("UpdatedBy").or_insert_with(|| json!({}));
        if !updated_by.is_object() {
            *updated_by = json!({});
        }
        if let Some(block) = updated_by.as_object_mut() {
            block.insert("Id".into(), json!(self.actor.id));
            block.insert("Name".into(), json!(self.actor.name));
            block.insert("UserName".into(), json!(self.actor.user_name));
        }
        obj.insert("UpdatedOnUTC".into(), json!(self.stamped_at));

        appended
    }
}

/// A scripted update applied server-side to every document a query matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchByQuery {
    pub query: IndexQuery,
    pub patch: TagPatch,
    /// Run against possibly-stale index results instead of waiting.
    pub allow_stale: bool,
    pub retrieve_details: bool,
}

impl PatchByQuery {
    /// Full script text (helper declaration, query, update block) and the
    /// merged parameter set.
    pub fn to_rql(&self) -> (String, Map<String, Value>) {
        let (query_text, mut params) = self.query.to_rql();
        params.extend(self.patch.parameters());
        let script = format!("{ADD_TAG_SCRIPT}\n{query_text}\n{}", self.patch.update_block());
        (script, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tag() -> TagReference {
        TagReference {
            id: "Tag-1".into(),
            name: "SomeTag".into(),
        }
    }

    fn actor() -> User {
        User {
            id: "User-Wade".into(),
            name: "Wade Wright".into(),
            user_name: "wwright@example.com".into(),
        }
    }

    fn payment(id: &str, amount: f64, tags: Value) -> StoredDocument {
        StoredDocument {
            id: id.into(),
            collection: "Payments".into(),
            body: json!({ "Amount": amount, "Tags": tags }),
        }
    }

    fn untagged_below(threshold: f64) -> IndexQuery {
        IndexQuery::for_index("PaymentDataSearchIndex", "Payments")
            .where_less_than("Amount", threshold)
            .and_not_contains_any(TAG_IDS_FIELD, vec!["Tag-1".into()])
    }

    #[test]
    fn renders_query_with_parameters() {
        let (text, params) = untagged_below(-5000.0).to_rql();
        assert_eq!(
            text,
            "from index 'PaymentDataSearchIndex' where Amount < $p0 and not TagIds in ($p1)"
        );
        assert_eq!(params["p0"], json!(-5000.0));
        assert_eq!(params["p1"], json!(["Tag-1"]));
    }

    #[test]
    fn leading_negation_gets_positive_operand() {
        let query = IndexQuery::for_index("I", "Payments")
            .and_not_contains_any(TAG_IDS_FIELD, vec!["Tag-1".into()]);
        let (text, _) = query.to_rql();
        assert_eq!(text, "from index 'I' where true and not TagIds in ($p0)");
    }

    #[test]
    fn matches_only_untagged_documents_below_threshold() {
        let query = untagged_below(-5000.0);
        assert!(query.matches(&payment("a", -6000.0, json!([]))));
        assert!(!query.matches(&payment("b", -6000.0, json!([{"Id": "Tag-1", "Name": "SomeTag"}]))));
        assert!(!query.matches(&payment("c", -100.0, json!([]))));
    }

    #[test]
    fn other_tags_do_not_exclude() {
        let query = untagged_below(-5000.0);
        assert!(query.matches(&payment("a", -6000.0, json!([{"Id": "Tag-2"}]))));
    }

    #[test]
    fn wrong_collection_never_matches() {
        let mut doc = payment("a", -6000.0, json!([]));
        doc.collection = "Charges".into();
        assert!(!untagged_below(-5000.0).matches(&doc));
    }

    #[test]
    fn audit_timestamp_has_seven_fraction_digits() {
        let at = Utc.with_ymd_and_hms(2019, 4, 30, 13, 45, 7).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(format_audit_timestamp(at), "2019-04-30T13:45:07.1234567Z");
    }

    #[test]
    fn apply_appends_tag_once_and_stamps_audit() {
        let patch = TagPatch::new(tag(), actor(), Utc::now());
        let mut body = json!({ "Amount": -6000.0 });

        assert!(patch.apply(&mut body));
        assert!(!patch.apply(&mut body));

        let tags = body["Tags"].as_array().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0]["Id"], "Tag-1");
        assert_eq!(tags[0]["Name"], "SomeTag");
        assert_eq!(body["UpdatedBy"]["Id"], "User-Wade");
        assert_eq!(body["UpdatedBy"]["UserName"], "wwright@example.com");
        assert_eq!(body["UpdatedOnUTC"], json!(patch.stamped_at));
    }

    #[test]
    fn apply_preserves_existing_tags() {
        let patch = TagPatch::new(tag(), actor(), Utc::now());
        let mut body = json!({ "Tags": [{"Id": "Tag-0", "Name": "Old"}] });
        patch.apply(&mut body);
        let ids: Vec<&str> = body["Tags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["Id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["Tag-0", "Tag-1"]);
    }

    #[test]
    fn patch_script_contains_query_and_update() {
        let op = PatchByQuery {
            query: untagged_below(-5000.0),
            patch: TagPatch::new(tag(), actor(), Utc::now()),
            allow_stale: true,
            retrieve_details: false,
        };
        let (script, params) = op.to_rql();
        assert!(script.starts_with("declare function addTag"));
        assert!(script.contains("from index 'PaymentDataSearchIndex'"));
        assert!(script.contains("this.Tags = addTag(this.Tags, $tag);"));
        assert_eq!(params["actorId"], "User-Wade");
        assert_eq!(params["tag"]["Id"], "Tag-1");
        assert!(params.contains_key("p0"));
    }
}
