//! Catalog introspection for the driver dump.

use strongbox_core::DumpError;
use tokio_postgres::Transaction;

use super::{DEFAULT_SCHEMA, error_detail};
use crate::sql::{Dialect, one_line, qualified, quote_ident, quote_literal, terminated};

const ENUM_TYPES: &str = "
    SELECT t.typname::text, array_agg(e.enumlabel::text ORDER BY e.enumsortorder)
    FROM pg_type t
    JOIN pg_enum e ON e.enumtypid = t.oid
    JOIN pg_namespace n ON n.oid = t.typnamespace
    WHERE n.nspname = $1::text
    GROUP BY t.typname
    ORDER BY t.typname";

const DOMAINS: &str = "
    SELECT t.typname::text,
           format_type(t.typbasetype, t.typtypmod),
           t.typnotnull,
           t.typdefault,
           COALESCE(array_agg(pg_get_constraintdef(c.oid) ORDER BY c.conname)
                    FILTER (WHERE c.oid IS NOT NULL), '{}'::text[])
    FROM pg_type t
    JOIN pg_namespace n ON n.oid = t.typnamespace
    LEFT JOIN pg_constraint c ON c.contypid = t.oid AND c.contype = 'c'
    WHERE t.typtype = 'd' AND n.nspname = $1::text
    GROUP BY t.oid, t.typname, t.typbasetype, t.typtypmod, t.typnotnull, t.typdefault
    ORDER BY t.typname";

// Creation order keeps views that select from other views valid
const VIEWS: &str = "
    SELECT c.relname::text, pg_get_viewdef(c.oid)
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind = 'v' AND n.nspname = $1::text
    ORDER BY c.oid";

const TABLES: &str = "
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema = $1::text AND table_type = 'BASE TABLE'
    ORDER BY table_name";

const COLUMNS: &str = "
    SELECT a.attname::text,
           format_type(a.atttypid, a.atttypmod),
           a.attnotnull,
           pg_get_expr(d.adbin, d.adrelid),
           a.attidentity::text,
           a.attgenerated::text,
           t.typcategory::text
    FROM pg_attribute a
    JOIN pg_type t ON t.oid = a.atttypid
    LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE a.attrelid = $1::text::regclass AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum";

const CONSTRAINTS: &str = "
    SELECT conname::text, pg_get_constraintdef(oid)
    FROM pg_constraint
    WHERE conrelid = $1::text::regclass AND contype IN ('p', 'u', 'c', 'x')
    ORDER BY contype = 'p' DESC, conname";

const INDEXES: &str = "
    SELECT pg_get_indexdef(i.indexrelid)
    FROM pg_index i
    JOIN pg_class c ON c.oid = i.indexrelid
    WHERE i.indrelid = $1::text::regclass
      AND NOT EXISTS (
          SELECT 1 FROM pg_constraint k
          WHERE k.conindid = i.indexrelid
            AND k.conrelid = i.indrelid
            AND k.contype IN ('p', 'u', 'x'))
    ORDER BY c.relname";

const FOREIGN_KEYS: &str = "
    SELECT r.relname::text, c.conname::text, pg_get_constraintdef(c.oid)
    FROM pg_constraint c
    JOIN pg_class r ON r.oid = c.conrelid
    JOIN pg_namespace n ON n.oid = r.relnamespace
    WHERE c.contype = 'f' AND n.nspname = $1::text
    ORDER BY r.relname, c.conname";

// Identity sequences are recreated by their column definition
const SEQUENCES: &str = "
    SELECT s.sequencename::text,
           s.data_type::text,
           s.start_value,
           s.min_value,
           s.max_value,
           s.increment_by,
           s.cycle,
           s.cache_size,
           s.last_value,
           o.relname::text,
           o.attname::text
    FROM pg_sequences s
    JOIN pg_namespace n ON n.nspname = s.schemaname
    JOIN pg_class c ON c.relname = s.sequencename AND c.relnamespace = n.oid
    LEFT JOIN LATERAL (
        SELECT t.relname, a.attname, d.deptype
        FROM pg_depend d
        JOIN pg_class t ON t.oid = d.refobjid
        JOIN pg_attribute a ON a.attrelid = d.refobjid AND a.attnum = d.refobjsubid
        WHERE d.classid = 'pg_class'::regclass
          AND d.objid = c.oid
          AND d.deptype IN ('a', 'i')
        LIMIT 1
    ) o ON true
    WHERE s.schemaname = $1::text AND o.deptype IS DISTINCT FROM 'i'
    ORDER BY s.sequencename";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Identity {
    None,
    Always,
    ByDefault,
}

#[derive(Debug, Clone)]
pub(super) struct Column {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub identity: Identity,
    pub generated: bool,
    /// `pg_type.typcategory`
    pub category: char,
}

impl Column {
    /// Numerics and booleans render unquoted
    pub fn unquoted(&self) -> bool {
        matches!(self.category, 'N' | 'B')
    }

    fn definition(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.data_type);
        match (self.generated, self.identity, &self.default) {
            (true, _, Some(expr)) => def.push_str(&format!(" GENERATED ALWAYS AS ({expr}) STORED")),
            (_, Identity::Always, _) => def.push_str(" GENERATED ALWAYS AS IDENTITY"),
            (_, Identity::ByDefault, _) => def.push_str(" GENERATED BY DEFAULT AS IDENTITY"),
            (_, Identity::None, Some(expr)) => def.push_str(&format!(" DEFAULT {expr}")),
            _ => {}
        }
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        one_line(&def)
    }
}

#[derive(Debug, Clone)]
pub(super) struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// `(name, definition)` of primary key, unique, check and exclusion constraints
    pub constraints: Vec<(String, String)>,
    pub indexes: Vec<String>,
}

impl Table {
    pub fn qualified(&self) -> String {
        qualified(DEFAULT_SCHEMA, &self.name)
    }

    /// Columns that accept inserted values
    pub fn insertable(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.generated)
    }

    pub fn needs_override(&self) -> bool {
        self.columns.iter().any(|c| c.identity == Identity::Always)
    }

    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(Column::definition).collect();
        parts.extend(self.constraints.iter().map(|(name, def)| {
            one_line(&format!("CONSTRAINT {} {def}", quote_ident(name)))
        }));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            self.qualified(),
            parts.join(", ")
        )
    }

    /// `setval` statements re-aligning identity sequences with the data
    pub fn identity_setvals(&self) -> Vec<String> {
        let table = self.qualified();
        self.columns
            .iter()
            .filter(|c| c.identity != Identity::None)
            .map(|c| {
                let column = quote_ident(&c.name);
                format!(
                    "SELECT pg_catalog.setval(pg_get_serial_sequence({}, {}), COALESCE((SELECT MAX({column}) FROM {table}), 1), (SELECT MAX({column}) FROM {table}) IS NOT NULL);",
                    quote_literal(Dialect::Postgres, &table),
                    quote_literal(Dialect::Postgres, &c.name),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(super) struct ForeignKey {
    pub table: String,
    pub name: String,
    pub definition: String,
}

impl ForeignKey {
    pub fn drop_sql(&self) -> String {
        format!(
            "ALTER TABLE IF EXISTS {} DROP CONSTRAINT IF EXISTS {};",
            qualified(DEFAULT_SCHEMA, &self.table),
            quote_ident(&self.name)
        )
    }

    pub fn add_sql(&self) -> String {
        one_line(&format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {};",
            qualified(DEFAULT_SCHEMA, &self.table),
            quote_ident(&self.name),
            self.definition
        ))
    }
}

#[derive(Debug, Clone)]
pub(super) struct Sequence {
    pub name: String,
    pub data_type: String,
    pub start: i64,
    pub min: i64,
    pub max: i64,
    pub increment: i64,
    pub cycle: bool,
    pub cache: i64,
    pub last_value: Option<i64>,
    pub owned_by: Option<(String, String)>,
}

impl Sequence {
    fn qualified(&self) -> String {
        qualified(DEFAULT_SCHEMA, &self.name)
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE SEQUENCE IF NOT EXISTS {} AS {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} CACHE {}{};",
            self.qualified(),
            self.data_type,
            self.increment,
            self.min,
            self.max,
            self.start,
            self.cache,
            if self.cycle { " CYCLE" } else { " NO CYCLE" }
        )
    }

    pub fn owned_by_sql(&self) -> Option<String> {
        let (table, column) = self.owned_by.as_ref()?;
        Some(format!(
            "ALTER SEQUENCE {} OWNED BY {}.{};",
            self.qualified(),
            qualified(DEFAULT_SCHEMA, table),
            quote_ident(column)
        ))
    }

    pub fn setval_sql(&self) -> Option<String> {
        let last = self.last_value?;
        Some(format!(
            "SELECT pg_catalog.setval({}, {last}, true);",
            quote_literal(Dialect::Postgres, &self.qualified())
        ))
    }
}

/// CREATE TYPE has no IF NOT EXISTS; an existing type is left alone
fn create_once(ddl: &str) -> String {
    format!(
        "DO $strongbox$BEGIN {ddl}; EXCEPTION WHEN duplicate_object THEN NULL; END$strongbox$;"
    )
}

#[derive(Debug, Clone)]
pub(super) struct EnumType {
    pub name: String,
    pub labels: Vec<String>,
}

impl EnumType {
    pub fn create_sql(&self) -> String {
        let labels = self
            .labels
            .iter()
            .map(|label| quote_literal(Dialect::Postgres, label))
            .collect::<Vec<_>>()
            .join(", ");
        create_once(&format!(
            "CREATE TYPE {} AS ENUM ({labels})",
            qualified(DEFAULT_SCHEMA, &self.name)
        ))
    }
}

#[derive(Debug, Clone)]
pub(super) struct Domain {
    pub name: String,
    pub base_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub checks: Vec<String>,
}

impl Domain {
    pub fn create_sql(&self) -> String {
        let mut ddl = format!(
            "CREATE DOMAIN {} AS {}",
            qualified(DEFAULT_SCHEMA, &self.name),
            self.base_type
        );
        if let Some(default) = &self.default {
            ddl.push_str(&format!(" DEFAULT {default}"));
        }
        if self.not_null {
            ddl.push_str(" NOT NULL");
        }
        for check in &self.checks {
            ddl.push(' ');
            ddl.push_str(check);
        }
        create_once(&one_line(&ddl))
    }
}

#[derive(Debug, Clone)]
pub(super) struct View {
    pub name: String,
    pub definition: String,
}

impl View {
    pub fn create_sql(&self) -> String {
        terminated(&one_line(&format!(
            "CREATE OR REPLACE VIEW {} AS {}",
            qualified(DEFAULT_SCHEMA, &self.name),
            self.definition.trim()
        )))
    }
}

#[derive(Debug, Clone, Default)]
pub(super) struct Catalog {
    pub enums: Vec<EnumType>,
    pub domains: Vec<Domain>,
    pub sequences: Vec<Sequence>,
    pub tables: Vec<Table>,
    pub foreign_keys: Vec<ForeignKey>,
    pub views: Vec<View>,
}

fn query_error(context: impl Into<String>) -> impl FnOnce(tokio_postgres::Error) -> DumpError {
    let context = context.into();
    move |e| DumpError::Query {
        context,
        reason: error_detail(&e),
    }
}

impl Catalog {
    pub async fn load(tx: &Transaction<'_>) -> Result<Self, DumpError> {
        let enums = tx
            .query(ENUM_TYPES, &[&DEFAULT_SCHEMA])
            .await
            .map_err(query_error("enum types"))?
            .iter()
            .map(|row| EnumType {
                name: row.get(0),
                labels: row.get(1),
            })
            .collect();

        let domains = tx
            .query(DOMAINS, &[&DEFAULT_SCHEMA])
            .await
            .map_err(query_error("domains"))?
            .iter()
            .map(|row| Domain {
                name: row.get(0),
                base_type: row.get(1),
                not_null: row.get(2),
                default: row.get(3),
                checks: row.get(4),
            })
            .collect();

        let sequences = tx
            .query(SEQUENCES, &[&DEFAULT_SCHEMA])
            .await
            .map_err(query_error("sequences"))?
            .iter()
            .map(|row| Sequence {
                name: row.get(0),
                data_type: row.get(1),
                start: row.get(2),
                min: row.get(3),
                max: row.get(4),
                increment: row.get(5),
                cycle: row.get(6),
                cache: row.get(7),
                last_value: row.get(8),
                owned_by: match (row.get::<_, Option<String>>(9), row.get::<_, Option<String>>(10)) {
                    (Some(table), Some(column)) => Some((table, column)),
                    _ => None,
                },
            })
            .collect();

        let names: Vec<String> = tx
            .query(TABLES, &[&DEFAULT_SCHEMA])
            .await
            .map_err(query_error("tables"))?
            .iter()
            .map(|row| row.get(0))
            .collect();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            tables.push(Self::load_table(tx, name).await?);
        }

        let foreign_keys = tx
            .query(FOREIGN_KEYS, &[&DEFAULT_SCHEMA])
            .await
            .map_err(query_error("foreign keys"))?
            .iter()
            .map(|row| ForeignKey {
                table: row.get(0),
                name: row.get(1),
                definition: row.get(2),
            })
            .collect();

        let views = tx
            .query(VIEWS, &[&DEFAULT_SCHEMA])
            .await
            .map_err(query_error("views"))?
            .iter()
            .map(|row| View {
                name: row.get(0),
                definition: row.get(1),
            })
            .collect();

        Ok(Self {
            enums,
            domains,
            sequences,
            tables,
            foreign_keys,
            views,
        })
    }

    async fn load_table(tx: &Transaction<'_>, name: String) -> Result<Table, DumpError> {
        let regclass = qualified(DEFAULT_SCHEMA, &name);
        let context = format!("table {name}");

        let columns = tx
            .query(COLUMNS, &[&regclass])
            .await
            .map_err(query_error(context.clone()))?
            .iter()
            .map(|row| {
                let identity: String = row.get(4);
                let generated: String = row.get(5);
                let category: String = row.get(6);
                Column {
                    name: row.get(0),
                    data_type: row.get(1),
                    not_null: row.get(2),
                    default: row.get(3),
                    identity: match identity.as_str() {
                        "a" => Identity::Always,
                        "d" => Identity::ByDefault,
                        _ => Identity::None,
                    },
                    generated: !generated.is_empty(),
                    category: category.chars().next().unwrap_or('U'),
                }
            })
            .collect();

        let constraints = tx
            .query(CONSTRAINTS, &[&regclass])
            .await
            .map_err(query_error(context.clone()))?
            .iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect();

        let indexes = tx
            .query(INDEXES, &[&regclass])
            .await
            .map_err(query_error(context))?
            .iter()
            .map(|row| row.get(0))
            .collect();

        Ok(Table {
            name,
            columns,
            constraints,
            indexes,
        })
    }
}
