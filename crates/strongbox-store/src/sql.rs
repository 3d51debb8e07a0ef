//! SQL text rendering shared by the driver dumps.
//!
//! Every emitted statement must fit on one line, since replay splits on
//! lines ending with `;`. Literals containing line breaks are therefore
//! encoded per dialect instead of being written verbatim.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `schema."table"` with both parts quoted
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Render a string literal, doubling single quotes
pub fn quote_literal(dialect: Dialect, value: &str) -> String {
    if !value.contains(['\n', '\r']) {
        return format!("'{}'", value.replace('\'', "''"));
    }
    match dialect {
        Dialect::Postgres => {
            let mut escaped = String::with_capacity(value.len() + 8);
            for c in value.chars() {
                match c {
                    '\\' => escaped.push_str("\\\\"),
                    '\'' => escaped.push_str("''"),
                    '\n' => escaped.push_str("\\n"),
                    '\r' => escaped.push_str("\\r"),
                    other => escaped.push(other),
                }
            }
            format!("E'{escaped}'")
        }
        Dialect::Sqlite => {
            let mut parts = Vec::new();
            let mut current = String::new();
            for c in value.chars() {
                match c {
                    '\n' | '\r' => {
                        parts.push(format!("'{}'", current.replace('\'', "''")));
                        parts.push(format!("char({})", u32::from(c)));
                        current.clear();
                    }
                    other => current.push(other),
                }
            }
            parts.push(format!("'{}'", current.replace('\'', "''")));
            parts.join(" || ")
        }
    }
}

/// Collapse catalog DDL onto a single line
pub fn one_line(sql: &str) -> String {
    sql.split(['\n', '\r'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Terminate a statement with `;` unless it already is
pub fn terminated(sql: &str) -> String {
    let trimmed = sql.trim_end();
    if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    }
}

/// Insert `IF NOT EXISTS` after a `CREATE <kind>` prefix, when present
pub fn if_not_exists(ddl: &str) -> String {
    const PREFIXES: [&str; 5] = [
        "CREATE TABLE ",
        "CREATE UNIQUE INDEX ",
        "CREATE INDEX ",
        "CREATE VIEW ",
        "CREATE TRIGGER ",
    ];
    const GUARD: &str = "IF NOT EXISTS ";
    let starts_with = |text: &str, prefix: &str| {
        text.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };
    for prefix in PREFIXES {
        if starts_with(ddl, prefix) {
            let rest = &ddl[prefix.len()..];
            if starts_with(rest, GUARD) {
                return ddl.to_string();
            }
            return format!("{prefix}{GUARD}{rest}");
        }
    }
    ddl.to_string()
}
