//! Catalog reference data: items, categories, locations, suppliers.
//!
//! Mutated independently of the ledger and read-only from its perspective.
//! Validation here is pure; per-tenant uniqueness (SKU, barcode, codes) is
//! enforced by the store.

pub mod item;
pub mod location;
pub mod supplier;

pub use item::{Category, CategoryId, Item, ItemId, NewItem};
pub use location::{Location, LocationId};
pub use supplier::{Supplier, SupplierId};

use stockledger_core::{DomainError, DomainResult};

/// Trim and require a non-empty identifier-like field (SKU, code, name).
pub(crate) fn required(field: &str, value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

/// Codes and SKUs are matched case-insensitively.
pub(crate) fn normalize_code(field: &str, value: &str) -> DomainResult<String> {
    let code = required(field, value)?;
    if code.chars().any(char::is_whitespace) {
        return Err(DomainError::validation(format!(
            "{field} cannot contain whitespace"
        )));
    }
    Ok(code.to_uppercase())
}
