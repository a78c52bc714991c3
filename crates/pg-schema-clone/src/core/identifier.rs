//! Identifier validation, quoting and schema-qualifier rewriting.
//!
//! SQL identifiers (schema, table, column names) cannot be passed as bind
//! parameters, so every DDL statement in this crate embeds them as text. All of
//! them go through [`quote_ident`] / [`qualify`], which validate the name and
//! apply PostgreSQL double-quote escaping.
//!
//! Text taken verbatim from the catalog (view bodies, index definitions,
//! default expressions) is carried over with [`rewrite_references`], which
//! points references to cloned relations at the target schema.

use crate::error::{CloneError, Result};

/// PostgreSQL's NAMEDATALEN - 1. Longer names are silently truncated by the
/// server, which would break existence checks.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CloneError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(CloneError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CloneError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Validate a name used as a clone source or target schema.
pub fn validate_namespace_name(name: &str) -> Result<()> {
    validate_identifier(name)?;

    if name.trim().is_empty() {
        return Err(CloneError::Config(
            "Schema name cannot be blank".to_string(),
        ));
    }

    if name.to_lowercase().starts_with("pg_") {
        return Err(CloneError::Config(format!(
            "Schema name {:?} uses the reserved pg_ prefix",
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
///
/// ```ignore
/// assert_eq!(quote_ident("users")?, "\"users\"");
/// assert_eq!(quote_ident("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a name with its schema: `"schema"."name"`.
pub fn qualify(schema: &str, name: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(name)?))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Whether `name` can appear unquoted without changing meaning.
fn is_simple_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
}

/// Render an identifier the way the catalog does: bare when simple, quoted
/// otherwise. Unchecked; callers validate names first.
fn render_ident(name: &str) -> String {
    if is_simple_identifier(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Replace every occurrence of `from` in `text` that is not glued to an
/// identifier character (or quote) on either side.
fn replace_bounded(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }

    let glued = |c: char| is_ident_char(c) || c == '"';
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if !prev.is_some_and(glued) && rest.starts_with(from) {
            let after = rest[from.len()..].chars().next();
            if !after.is_some_and(glued) {
                out.push_str(to);
                rest = &rest[from.len()..];
                prev = to.chars().last();
                continue;
            }
        }
        out.push(c);
        prev = Some(c);
        rest = &rest[c.len_utf8()..];
    }

    out
}

/// Spellings of a name the catalog may produce: always quoted, and bare when
/// that is unambiguous.
fn ident_forms(name: &str) -> Vec<String> {
    let quoted = format!("\"{}\"", name.replace('"', "\"\""));
    if is_simple_identifier(name) {
        vec![quoted, name.to_string()]
    } else {
        vec![quoted]
    }
}

/// Target name of a cloned sequence.
///
/// Sequences named after the template (`<source>_<rest>`) are renamed after
/// the tenant (`<target>_<rest>`); all others keep their name. A rename that
/// would exceed the identifier limit keeps the original name.
pub fn rename_sequence(name: &str, source: &str, target: &str) -> String {
    let prefix = format!("{}_", source);
    match name.strip_prefix(&prefix) {
        Some(rest) => {
            let renamed = format!("{}_{}", target, rest);
            if renamed.len() > MAX_IDENTIFIER_LENGTH {
                name.to_string()
            } else {
                renamed
            }
        }
        None => name.to_string(),
    }
}

/// Rewrite catalog text for the target schema.
///
/// `relations` maps every relation the clone creates (tables, views,
/// sequences) from its source name to its target name. Each schema-qualified
/// reference to one of them, bare or quoted, also inside string literals such
/// as `nextval('tmpl.seq'::regclass)`, is pointed at the target. Everything
/// else qualified with the source schema (types, functions) keeps resolving
/// to the template, and names that merely end with the source name
/// (`xtmpl.`) are left alone.
pub fn rewrite_references(
    text: &str,
    source: &str,
    target: &str,
    relations: &[(String, String)],
) -> String {
    let schema_forms = ident_forms(source);
    let target_schema = render_ident(target);
    let mut text = text.to_string();

    for (old, new) in relations {
        let replacement = format!("{}.{}", target_schema, render_ident(new));
        for schema in &schema_forms {
            for name in ident_forms(old) {
                text = replace_bounded(&text, &format!("{}.{}", schema, name), &replacement);
            }
        }
    }

    text
}
