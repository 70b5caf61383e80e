//! SQL scoping: every table identifier reachable through `execute_sql`
//! must carry the caller's `__user_<owner>_` prefix, and only read-only
//! statements pass.

use std::sync::OnceLock;

use regex::Regex;

use dq_domain::error::{Error, Result};

/// Candidate scoped identifiers anywhere in the statement text.
fn scoped_ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The pattern is a literal, so compilation cannot fail at runtime.
    RE.get_or_init(|| Regex::new(r"__user_[A-Za-z0-9]\w*").expect("static regex"))
}

/// The identifier prefix that scopes a user's tables.
///
/// Owner ids are normalized to lowercase alphanumerics so the prefix is a
/// valid SQL identifier fragment regardless of the id's original shape.
pub fn owner_prefix(user_id: &str) -> String {
    let normalized: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("__user_{normalized}_")
}

/// Statement keywords that are never allowed through this tool.
const FORBIDDEN_LEADS: &[&str] = &[
    "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant", "revoke",
    "attach", "pragma", "vacuum",
];

/// Validate a statement for the given caller.
///
/// Rules:
/// 1. A single statement only (no `;`-chained payloads).
/// 2. Must be a `SELECT` (optionally `WITH`-prefixed); DDL/DML is refused
///    as `InvalidArgument`.
/// 3. Every identifier matching the `__user_…` shape must start with the
///    caller's own prefix; anything else fails with `Unauthorized`.
pub fn validate_scoped_sql(user_id: &str, query: &str) -> Result<()> {
    let trimmed = query.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("empty SQL statement".into()));
    }
    if trimmed.contains(';') {
        return Err(Error::InvalidArgument(
            "multiple SQL statements are not allowed".into(),
        ));
    }

    let lead = trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    if FORBIDDEN_LEADS.contains(&lead.as_str()) {
        return Err(Error::InvalidArgument(format!(
            "statement kind '{lead}' is not permitted; read-only SELECT only"
        )));
    }
    if lead != "select" && lead != "with" {
        return Err(Error::InvalidArgument(format!(
            "unsupported statement '{lead}'; read-only SELECT only"
        )));
    }

    let prefix = owner_prefix(user_id);
    for m in scoped_ident_re().find_iter(trimmed) {
        let ident = m.as_str();
        if !ident.starts_with(&prefix) {
            return Err(Error::Unauthorized(format!(
                "table '{ident}' is outside the caller's namespace"
            )));
        }
    }

    Ok(())
}
