//! Tenant schema naming.

use super::identifier::{validate_namespace_name, MAX_IDENTIFIER_LENGTH};
use crate::error::{CloneError, Result};

/// Longest display-name prefix kept in a derived schema name.
const MAX_PREFIX_LENGTH: usize = 20;

/// Derive the schema name for a tenant from its display name and identifier.
///
/// The display name is lower-cased and stripped to `[a-z0-9]`, keeping at
/// most 20 characters. The identifier is lower-cased, hyphens become
/// underscores and anything outside `[a-z0-9_]` is dropped. The result is
/// `prefix_identifier`, cut to 63 bytes.
///
/// ```
/// use pg_schema_clone::derive_namespace_name;
///
/// assert_eq!(derive_namespace_name("Acme", "9F2B").unwrap(), "acme_9f2b");
/// ```
pub fn derive_namespace_name(display_name: &str, tenant_id: &str) -> Result<String> {
    let mut prefix: String = display_name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .take(MAX_PREFIX_LENGTH)
        .collect();

    let ident: String = tenant_id
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect();

    if ident.trim_matches('_').is_empty() {
        return Err(CloneError::InvalidRequest(format!(
            "tenant id {:?} has no usable characters",
            tenant_id
        )));
    }

    // Unquoted identifiers cannot start with a digit.
    if prefix.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        prefix.insert(0, 't');
    }

    let mut name = format!("{}_{}", prefix, ident);
    // Everything is ASCII here, so byte truncation is safe.
    name.truncate(MAX_IDENTIFIER_LENGTH);

    validate_namespace_name(&name).map_err(|e| CloneError::InvalidRequest(e.to_string()))?;
    Ok(name)
}
