//! Lexical helpers that work directly on the SQL text.
//!
//! Positions of bound parameters are a property of the text, not of the
//! AST, so they are recovered here: literals and comments are blanked out
//! first (keeping byte offsets stable), then placeholders, top-level
//! keywords and `column <op> ?` shapes are found with plain scanning.

use regex::Regex;
use std::sync::LazyLock;

const IDENT: &str = r#"(?:[a-z_][a-z0-9_$]*|"[^"]+"|`[^`]+`)"#;

/// `column <op>` immediately before a placeholder.
static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?is)(?P<col>{IDENT}(?:\s*\.\s*{IDENT})*)\s*(?:=|<>|!=|<=|>=|<|>|(?:not\s+)?i?like|(?:not\s+)?in\s*\((?:[^()]*,)?|(?:not\s+)?between(?:\s+\S+\s+and)?)\s*(?:\(\s*)*$"
    );
    Regex::new(&pattern).unwrap()
});

/// `INSERT [modifiers] INTO table [(columns)]`.
static INSERT_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?is)^\s*(?:insert|replace)\s+(?:[a-z_]+\s+)*?into\s+(?P<table>{IDENT}(?:\s*\.\s*{IDENT})*)\s*(?:\((?P<columns>[^()]*)\))?"
    );
    Regex::new(&pattern).unwrap()
});

/// `UPDATE [ONLY] table [[AS] alias] SET`.
static UPDATE_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?is)^\s*update\s+(?:only\s+)?(?P<table>{IDENT}(?:\s*\.\s*{IDENT})*)(?:\s+(?:as\s+)?(?P<alias>{IDENT}))?\s+set\b"
    );
    Regex::new(&pattern).unwrap()
});

/// Target of a write statement recovered from its leading clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteHead {
    /// Table name as written, possibly qualified.
    pub table: String,
    pub alias: Option<String>,
    /// Column list of an INSERT; empty when none was given.
    pub columns: Vec<String>,
}

/// Table and column list of an INSERT or UPDATE, found by scanning.
pub(crate) fn write_head(masked: &str) -> Option<WriteHead> {
    if let Some(caps) = INSERT_HEAD.captures(masked) {
        let columns = caps
            .name("columns")
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        return Some(WriteHead {
            table: squeeze(caps.name("table")?.as_str()),
            alias: None,
            columns,
        });
    }
    let caps = UPDATE_HEAD.captures(masked)?;
    Some(WriteHead {
        table: squeeze(caps.name("table")?.as_str()),
        alias: caps.name("alias").map(|m| m.as_str().to_string()),
        columns: Vec::new(),
    })
}

fn squeeze(name: &str) -> String {
    name.split('.').map(str::trim).collect::<Vec<_>>().join(".")
}

/// A bound-parameter placeholder found in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placeholder {
    /// 1-based parameter position.
    pub position: usize,
    /// Byte offset of the placeholder in the SQL text.
    pub offset: usize,
}

/// Blank out string literals and comments, preserving byte offsets.
pub(crate) fn mask_literals(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                let mut j = i + 1;
                while j < bytes.len() {
                    if bytes[j] == b'\'' {
                        // '' is an escaped quote inside the literal
                        if bytes.get(j + 1) == Some(&b'\'') {
                            j += 2;
                            continue;
                        }
                        break;
                    }
                    j += 1;
                }
                for b in out.iter_mut().take(j.min(bytes.len())).skip(i + 1) {
                    *b = b' ';
                }
                i = j + 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    out[i] = b' ';
                    i += 1;
                }
                for b in out.iter_mut().skip(i).take(2) {
                    *b = b' ';
                }
                i += 2;
            }
            _ => i += 1,
        }
    }

    String::from_utf8(out).unwrap_or_else(|_| sql.to_string())
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find `?` and `$n` placeholders outside quoted identifiers.
///
/// `?` placeholders are numbered in text order; `$n` carries its own
/// position. `??` is an escaped literal question mark.
pub(crate) fn placeholders(masked: &str) -> Vec<Placeholder> {
    let bytes = masked.as_bytes();
    let mut found = Vec::new();
    let mut next_position = 1;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' | b'`' => quote = Some(b),
            b'?' => {
                if bytes.get(i + 1) == Some(&b'?') {
                    i += 2;
                    continue;
                }
                found.push(Placeholder {
                    position: next_position,
                    offset: i,
                });
                next_position += 1;
            }
            b'$' => {
                let after_ident = i > 0 && is_ident_byte(bytes[i - 1]);
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if !after_ident && j > i + 1 {
                    if let Ok(position) = masked[i + 1..j].parse::<usize>() {
                        found.push(Placeholder { position, offset: i });
                    }
                    i = j;
                    continue;
                }
            }
            _ => {}
        }
        i += 1;
    }

    found
}

/// Offset of the first occurrence of `keyword` at parenthesis depth zero.
pub(crate) fn find_top_level_keyword(masked: &str, keyword: &str) -> Option<usize> {
    let lower = masked.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let keyword = keyword.to_ascii_lowercase();
    let kw = keyword.as_bytes();
    let mut depth: i32 = 0;
    let mut quote: Option<u8> = None;

    for i in 0..bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'`' | b'\'' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && bytes[i..].starts_with(kw) => {
                let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
                let after_ok = bytes.get(i + kw.len()).is_none_or(|b| !is_ident_byte(*b));
                if before_ok && after_ok {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// `(qualifier, column)` compared against the placeholder that starts
/// right after `prefix`.
pub(crate) fn comparison_target(prefix: &str) -> Option<(Option<String>, String)> {
    let caps = COMPARISON.captures(prefix)?;
    let raw = caps.name("col")?.as_str();
    let mut parts: Vec<String> = raw
        .split('.')
        .map(|p| p.trim().trim_matches('"').trim_matches('`').to_string())
        .filter(|p| !p.is_empty())
        .collect();
    let column = parts.pop()?;
    let qualifier = parts.pop();
    Some((qualifier, column))
}

/// Item spans `(start, end)` of every row of a `VALUES` list.
///
/// `values_at` is the offset of the `VALUES` keyword. Scanning stops at the
/// first token after a row that is not `,`, so trailing clauses such as
/// `ON CONFLICT (...)` are not mistaken for rows.
pub(crate) fn values_rows(masked: &str, values_at: usize) -> Vec<Vec<(usize, usize)>> {
    let bytes = masked.as_bytes();
    let len = bytes.len();
    let mut rows = Vec::new();
    let mut i = values_at + "values".len();

    loop {
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= len || bytes[i] != b'(' {
            break;
        }

        let mut items = Vec::new();
        let mut depth = 0;
        let mut item_start = i + 1;
        let mut quote: Option<u8> = None;
        let mut j = i;
        while j < len {
            let b = bytes[j];
            if let Some(q) = quote {
                if b == q {
                    quote = None;
                }
                j += 1;
                continue;
            }
            match b {
                b'"' | b'`' | b'\'' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        items.push((item_start, j));
                        break;
                    }
                }
                b',' if depth == 1 => {
                    items.push((item_start, j));
                    item_start = j + 1;
                }
                _ => {}
            }
            j += 1;
        }
        rows.push(items);

        i = j + 1;
        while i < len && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < len && bytes[i] == b',' {
            i += 1;
            continue;
        }
        break;
    }

    rows
}

/// Rewrite `?` placeholders as `$1`, `$2`, ... for drivers that only
/// accept numbered ones. Existing `$n` placeholders are kept.
pub fn numbered_placeholders(sql: &str) -> String {
    let masked = mask_literals(sql);
    let mut out = String::with_capacity(sql.len() + 8);
    let mut last = 0;
    for holder in placeholders(&masked)
        .into_iter()
        .filter(|h| sql.as_bytes()[h.offset] == b'?')
    {
        out.push_str(&sql[last..holder.offset]);
        out.push('$');
        out.push_str(&holder.position.to_string());
        last = holder.offset + 1;
    }
    out.push_str(&sql[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_preserves_offsets() {
        let sql = "select 'a?b', x -- trailing ?\nfrom t /* ? */ where y = ?";
        let masked = mask_literals(sql);
        assert_eq!(masked.len(), sql.len());
        assert_eq!(placeholders(&masked).len(), 1);
    }

    #[test]
    fn escaped_quote_stays_inside_literal() {
        let masked = mask_literals("where a = 'it''s ?' and b = ?");
        let found = placeholders(&masked);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].position, 1);
    }

    #[test]
    fn dollar_placeholders_keep_their_number() {
        let found = placeholders("update t set a = $2 where b = $1");
        assert_eq!(
            found.iter().map(|p| p.position).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[test]
    fn double_question_mark_is_not_a_placeholder() {
        assert!(placeholders("select a ?? b").is_empty());
    }

    #[test]
    fn comparison_target_handles_qualifiers_and_operators() {
        assert_eq!(
            comparison_target("select * from t u where u.email = "),
            Some((Some("u".to_string()), "email".to_string()))
        );
        assert_eq!(
            comparison_target("where name LIKE "),
            Some((None, "name".to_string()))
        );
        assert_eq!(
            comparison_target("where id in (?, "),
            Some((None, "id".to_string()))
        );
        assert_eq!(
            comparison_target("where \"Email\" <> "),
            Some((None, "Email".to_string()))
        );
        assert_eq!(comparison_target("limit "), None);
    }

    #[test]
    fn top_level_keyword_skips_subqueries() {
        let sql = "update t set a = (select b from c where d = 1) where e = ?";
        let at = find_top_level_keyword(sql, "where").unwrap();
        assert_eq!(&sql[at..at + 5], "where");
        assert!(at > sql.find(')').unwrap());
    }

    #[test]
    fn values_rows_stop_at_trailing_clause() {
        let sql = "insert into t (a, b) values (?, lower(?)), (?, ?) on conflict (a) do nothing";
        let at = find_top_level_keyword(sql, "values").unwrap();
        let rows = values_rows(sql, at);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[1].len(), 2);
    }

    #[test]
    fn numbered_placeholders_skip_literals() {
        assert_eq!(
            numbered_placeholders("UPDATE t SET a = ?, b = '?' WHERE c = ?"),
            "UPDATE t SET a = $1, b = '?' WHERE c = $2"
        );
        assert_eq!(numbered_placeholders("SELECT $1"), "SELECT $1");
    }

    #[test]
    fn write_head_reads_insert_table_and_columns() {
        let head = write_head("INSERT IGNORE INTO app . users (name, \"Email\") VALUES (?, ?)").unwrap();
        assert_eq!(head.table, "app.users");
        assert_eq!(head.alias, None);
        assert_eq!(head.columns, vec!["name".to_string(), "\"Email\"".to_string()]);
    }

    #[test]
    fn write_head_reads_update_alias() {
        let head = write_head("update users u set u.email = ? where u.id = ?").unwrap();
        assert_eq!(head.table, "users");
        assert_eq!(head.alias.as_deref(), Some("u"));

        let head = write_head("UPDATE users SET email = ?").unwrap();
        assert_eq!(head.alias, None);

        assert_eq!(write_head("DELETE FROM users"), None);
    }
}
