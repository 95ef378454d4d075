// Entity Models
// Provider is the dimension (one row per registry identifier, first write wins);
// FinancialFact is the append-only fact (one balance per provider/period/account).

pub mod provider;
pub mod financial_fact;

pub use provider::Provider;
pub use financial_fact::{FinancialFact, FactProvenance};
