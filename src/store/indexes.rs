//! Secondary index definitions for the ledger collections.
//!
//! Map/reduce sources are store-native text; the harness only creates them
//! and watches them converge.

use super::types::IndexDefinition;

pub const CHARGE_SEARCH_INDEX: &str = "ChargeDataSearchIndex";
pub const PAYMENT_SEARCH_INDEX: &str = "PaymentDataSearchIndex";
pub const PATIENT_BY_DEPT_BY_ACCOUNT_INDEX: &str = "PatientTotalByGLDeptByGLAccountIndex";
pub const PATIENT_BY_ACCOUNT_INDEX: &str = "PatientTotalByGLAccountIndex";
pub const PATIENT_BY_DEPT_INDEX: &str = "PatientTotalByGLDeptIndex";

fn search_map(collection: &str) -> String {
    format!(
        "from dd in docs.{collection}
select new {{
    dd.PatientId,
    dd.GLAccount,
    dd.GLDepartment,
    dd.PostedDate,
    dd.DischargeDate,
    dd.Amount,
    TagIds = dd.Tags.Select(x => x.Id),
    Combined_Tags = dd.Tags == null ? \"\" : string.Join(\"|\", dd.Tags.OrderBy(x => x.Id).Select(x => x.Id)),
    ContentsForSearch = new object[] {{
        dd.PatientId,
        dd.GLAccount,
        dd.Amount,
        \"GeneralLedgerDepartment\" + dd.GLDepartment,
        \"GeneralLedgerAccount\" + dd.GLAccount
    }}
}}"
    )
}

/// One map per ledger collection, projecting the grouping keys plus a
/// transaction counter.
fn totals_maps(keys: &[&str]) -> Vec<String> {
    let projection = keys
        .iter()
        .map(|k| format!("    x.{k},"))
        .collect::<Vec<_>>()
        .join("\n");
    ["Payments", "Charges"]
        .iter()
        .map(|collection| {
            format!(
                "from x in docs.{collection}
select new {{
{projection}
    x.Amount,
    TransactionCount = 1
}}"
            )
        })
        .collect()
}

fn totals_reduce(keys: &[&str]) -> String {
    let group_key = keys
        .iter()
        .map(|k| format!("r.{k}"))
        .collect::<Vec<_>>()
        .join(", ");
    let projection = keys
        .iter()
        .map(|k| format!("    g.Key.{k},"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "from r in results
group r by new {{ {group_key} }} into g
select new {{
{projection}
    TransactionCount = g.Sum(z => z.TransactionCount),
    Amount = g.Sum(z => z.Amount)
}}"
    )
}

fn totals_index(name: &str, keys: &[&str]) -> IndexDefinition {
    IndexDefinition {
        name: name.to_string(),
        maps: totals_maps(keys),
        reduce: Some(totals_reduce(keys)),
    }
}

pub fn charge_search() -> IndexDefinition {
    IndexDefinition {
        name: CHARGE_SEARCH_INDEX.to_string(),
        maps: vec![search_map("Charges")],
        reduce: None,
    }
}

pub fn payment_search() -> IndexDefinition {
    IndexDefinition {
        name: PAYMENT_SEARCH_INDEX.to_string(),
        maps: vec![search_map("Payments")],
        reduce: None,
    }
}

pub fn patient_totals_by_dept_by_account() -> IndexDefinition {
    totals_index(
        PATIENT_BY_DEPT_BY_ACCOUNT_INDEX,
        &["PatientId", "GLDepartment", "GLAccount"],
    )
}

pub fn patient_totals_by_account() -> IndexDefinition {
    totals_index(PATIENT_BY_ACCOUNT_INDEX, &["PatientId", "GLAccount"])
}

pub fn patient_totals_by_dept() -> IndexDefinition {
    totals_index(PATIENT_BY_DEPT_INDEX, &["PatientId", "GLDepartment"])
}

/// Indexes created by the index phase of a run.
pub fn harness_indexes() -> Vec<IndexDefinition> {
    vec![
        charge_search(),
        payment_search(),
        patient_totals_by_dept_by_account(),
    ]
}
