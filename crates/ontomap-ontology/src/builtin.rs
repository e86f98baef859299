//! Starter enterprise ontology.
//!
//! A small fixed vocabulary covering the concepts that recur across CRM,
//! ERP, and billing schemas. Deployments with their own ontology load a
//! JSON document instead; this set exists so the engine is usable out of
//! the box and so tests have a realistic registry.

use crate::OntologyConcept;

/// The built-in concept set.
///
/// Hint weights below 1.0 mark fragments that are suggestive rather than
/// decisive (e.g. `amount` often means revenue, but not always).
pub fn starter_concepts() -> Vec<OntologyConcept> {
    vec![
        OntologyConcept::new("revenue", "Revenue", "finance")
            .hint("revenue")
            .hint("gross_revenue")
            .hint("net_revenue")
            .hint_weighted("amount", 0.8)
            .hint_weighted("sales", 0.7)
            .hint_weighted("arr", 0.9)
            .veto("tax")
            .veto("refund"),
        OntologyConcept::new("cost", "Cost", "finance")
            .hint("cost")
            .hint("cogs")
            .hint("expense")
            .hint_weighted("spend", 0.8),
        OntologyConcept::new("account", "Account", "finance")
            .hint("account")
            .hint("account_name")
            .hint_weighted("acct", 0.9)
            // General-ledger fields look like accounts but belong to the
            // ledger concept; suppress rather than misread them.
            .veto("gl")
            .veto("ledger"),
        OntologyConcept::new("ledger_account", "Ledger Account", "finance")
            .hint("gl_account")
            .hint("ledger_account")
            .hint_weighted("gl_code", 0.9),
        OntologyConcept::new("customer", "Customer", "parties")
            .hint("customer")
            .hint("client")
            .hint_weighted("buyer", 0.8)
            .hint_weighted("cust", 0.9),
        OntologyConcept::new("vendor", "Vendor", "parties")
            .hint("vendor")
            .hint("supplier")
            .hint_weighted("payee", 0.7),
        OntologyConcept::new("product", "Product", "catalog")
            .hint("product")
            .hint("sku")
            .hint_weighted("item", 0.7),
        OntologyConcept::new("quantity", "Quantity", "measures")
            .hint("quantity")
            .hint("qty")
            .hint_weighted("units", 0.7)
            .hint_weighted("count", 0.6),
        OntologyConcept::new("transaction_date", "Transaction Date", "time")
            .hint("transaction_date")
            .hint("txn_date")
            .hint("posting_date")
            .hint_weighted("date", 0.5)
            .veto_with_penalty("birth", 0.9),
        OntologyConcept::new("identifier", "Identifier", "keys")
            .hint_weighted("id", 0.6)
            .hint_weighted("uuid", 0.8)
            .hint_weighted("guid", 0.8)
            .hint_weighted("key", 0.5),
        OntologyConcept::new("status", "Status", "lifecycle")
            .hint("status")
            .hint_weighted("state", 0.7)
            .hint_weighted("stage", 0.7),
        OntologyConcept::new("region", "Region", "geo")
            .hint("region")
            .hint("territory")
            .hint_weighted("country", 0.8)
            .hint_weighted("state", 0.4),
    ]
}
