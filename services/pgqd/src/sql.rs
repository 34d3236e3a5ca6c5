//! Fixed SQL strings and identifier quoting (§6, §9).
//!
//! These statements are the queue extension's stable contract surface — they
//! are not composed from configuration or user input, with the one exception
//! of `quote_fqident`, which builds a `schema.table`-shaped identifier out of
//! a maintenance-operation argument the server handed back to us.

pub const DISCOVER_DATABASES: &str =
    "select datname from pg_database where not datistemplate and datallowconn";

pub const CHECK_PGQ: &str = "select 1 from pg_catalog.pg_namespace where nspname='pgq'";

pub const CHECK_VERSION: &str = "select pgq.version()";

pub const TICK: &str = "select pgq.ticker()";

pub const RETRY_EVENTS: &str = "select * from pgq.maint_retry_events()";

pub const CHECK_MAINT_OPERATIONS: &str = "select 1 from pg_proc p, pg_namespace n \
     where p.pronamespace=n.oid and p.proname='maint_operations' and n.nspname='pgq'";

pub const LOAD_MAINT_OPERATIONS: &str = "select func_name, func_arg from pgq.maint_operations()";

pub const LEGACY_QUEUE_LIST: &str = "select queue_name from pgq.get_queue_info()";

pub const LEGACY_ROTATE_STEP1: &str = "select pgq.maint_rotate_tables_step1($1)";

pub const LEGACY_ROTATE_STEP2: &str = "select pgq.maint_rotate_tables_step2()";

pub const LEGACY_VACUUM_LIST: &str = "select * from pgq.maint_tables_to_vacuum()";

/// Magic statement names in the new-style maintenance operations path
/// (§4.4, §9 "statement vs function dispatch"). Extend by appending.
pub const MAGIC_STATEMENTS: &[&str] = &["vacuum", "vacuum analyze"];

/// A practical bound on a quoted identifier. The legacy C helper used a
/// fixed-size stack buffer and returned failure rather than truncating on
/// overflow (§9); there is no such buffer here, but the same "fail, don't
/// truncate" contract is preserved against a generous bound instead of an
/// unbounded allocation driven by server-controlled input.
const MAX_IDENT_LEN: usize = 4096;

#[derive(Debug, thiserror::Error)]
#[error("identifier too long to quote safely ({len} bytes, max {MAX_IDENT_LEN})")]
pub struct IdentTooLong {
    len: usize,
}

/// Produces a fully-qualified, double-quoted identifier from a
/// `schema.table` (or bare `table`) string, doubling embedded `"` per part
/// (§9). Fails instead of truncating when the input is implausibly long.
pub fn quote_fqident(raw: &str) -> Result<String, IdentTooLong> {
    if raw.len() > MAX_IDENT_LEN {
        return Err(IdentTooLong { len: raw.len() });
    }
    Ok(raw
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join("."))
}

fn quote_ident(part: &str) -> String {
    let mut out = String::with_capacity(part.len() + 2);
    out.push('"');
    for ch in part.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_a_bare_identifier() {
        assert_eq!(quote_fqident("events").unwrap(), "\"events\"");
    }

    #[test]
    fn quotes_a_schema_qualified_identifier() {
        assert_eq!(quote_fqident("pgq.events_1").unwrap(), "\"pgq\".\"events_1\"");
    }

    #[test]
    fn doubles_embedded_quotes() {
        assert_eq!(quote_fqident("we\"ird").unwrap(), "\"we\"\"ird\"");
    }

    #[test]
    fn rejects_implausibly_long_input() {
        let huge = "a".repeat(MAX_IDENT_LEN + 1);
        assert!(quote_fqident(&huge).is_err());
    }
}
