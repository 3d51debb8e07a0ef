use std::fmt::Write as _;
use std::path::Path;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use strongbox_core::{
    ArtifactFormat, CancelSignal, DatastoreConnectionInfo, DumpError, DumpMode, Engine,
};

use super::{InterruptOnDrop, USER_OBJECTS, is_interrupted, open};
use crate::sql::{Dialect, if_not_exists, one_line, quote_ident, quote_literal, terminated};
use crate::strategy::{DumpStats, DumpStrategy};
use crate::writer::ArtifactWriter;

/// Tables in name order, then everything that depends on them in creation order
const SCHEMA_QUERY: &str = "SELECT type, name, sql FROM sqlite_master \
     WHERE sql IS NOT NULL AND {USER_OBJECTS} \
     ORDER BY CASE type WHEN 'table' THEN 0 WHEN 'index' THEN 1 WHEN 'view' THEN 2 ELSE 3 END, \
     CASE WHEN type = 'table' THEN name END, rowid";

#[derive(Debug)]
struct SchemaObject {
    kind: String,
    name: String,
    sql: String,
}

impl SchemaObject {
    fn is_virtual_table(&self) -> bool {
        self.kind == "table"
            && self
                .sql
                .get(..20)
                .is_some_and(|head| head.eq_ignore_ascii_case("CREATE VIRTUAL TABLE"))
    }
}

#[derive(Debug, Clone)]
pub struct SqliteDriverDump {
    info: DatastoreConnectionInfo,
}

impl SqliteDriverDump {
    pub fn new(info: DatastoreConnectionInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl DumpStrategy for SqliteDriverDump {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn mode(&self) -> DumpMode {
        DumpMode::Driver
    }

    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Sql
    }

    async fn dump(&self, target: &Path, cancel: &CancelSignal) -> Result<DumpStats, DumpError> {
        let conn = open(
            &self.info,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|reason| DumpError::Connect {
            engine: Engine::Sqlite,
            reason,
        })?;

        let guard = InterruptOnDrop::new(&conn);
        let stopped = guard.flag();
        let cancel = cancel.clone();
        let target = target.to_path_buf();
        let label = self.info.to_string();

        let result = tokio::task::spawn_blocking(move || {
            let should_stop = || stopped.load(Ordering::SeqCst) || cancel.is_cancelled();
            dump_database(&conn, &target, &label, &should_stop)
        })
        .await;
        guard.disarm();

        result.map_err(|e| DumpError::Worker(format!("SQLite dump worker failed: {e}")))?
    }
}

fn query_error(context: &str) -> impl Fn(rusqlite::Error) -> DumpError + '_ {
    move |e| {
        if is_interrupted(&e) {
            DumpError::Cancelled
        } else {
            DumpError::Query {
                context: context.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

fn dump_database(
    conn: &Connection,
    target: &Path,
    label: &str,
    should_stop: &dyn Fn() -> bool,
) -> Result<DumpStats, DumpError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(query_error("snapshot"))?;

    let objects = {
        let mut stmt = tx
            .prepare(&SCHEMA_QUERY.replace("{USER_OBJECTS}", USER_OBJECTS))
            .map_err(query_error("schema"))?;
        stmt.query_map([], |row| {
            Ok(SchemaObject {
                kind: row.get(0)?,
                name: row.get(1)?,
                sql: row.get(2)?,
            })
        })
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(query_error("schema"))?
    };

    let mut writer = ArtifactWriter::create(target, ArtifactFormat::Sql)?;
    writer.comment(&format!("Strongbox backup of {label}"))?;
    writer.comment(&format!("Created {}", chrono::Local::now().to_rfc3339()))?;
    writer.statement("PRAGMA defer_foreign_keys = ON;")?;
    // Recreated after the data so they cannot fire during the load
    for trigger in objects.iter().filter(|o| o.kind == "trigger") {
        writer.statement(&format!("DROP TRIGGER IF EXISTS {};", quote_ident(&trigger.name)))?;
    }

    let mut stats = DumpStats::default();
    for object in objects.iter().filter(|o| o.kind == "table") {
        if object.is_virtual_table() {
            tracing::warn!(table = %object.name, "Skipping virtual table");
            continue;
        }
        writer.blank()?;
        writer.comment(&format!("Table: {}", object.name))?;
        writer.statement(&terminated(&if_not_exists(&one_line(&object.sql))))?;
        writer.statement(&format!("DELETE FROM {};", quote_ident(&object.name)))?;

        let rows = dump_rows(&tx, &object.name, &mut writer, should_stop)?;
        tracing::debug!(table = %object.name, rows, "Dumped table");
        stats.tables += 1;
        stats.rows += rows;
    }

    writer.blank()?;
    for object in objects.iter().filter(|o| o.kind != "table") {
        writer.statement(&terminated(&if_not_exists(&one_line(&object.sql))))?;
    }

    dump_sequences(&tx, &mut writer)?;
    drop(tx);

    writer.finish()?;
    Ok(stats)
}

fn dump_rows(
    conn: &Connection,
    table: &str,
    writer: &mut ArtifactWriter,
    should_stop: &dyn Fn() -> bool,
) -> Result<u64, DumpError> {
    let context = format!("rows of {table}");
    let columns: Vec<String> = {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
            .map_err(query_error(&context))?;
        stmt.query_map([], |row| row.get::<_, String>(1))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(query_error(&context))?
    };
    if columns.is_empty() {
        return Ok(0);
    }

    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let target = quote_ident(table);
    let mut stmt = conn
        .prepare(&format!("SELECT {column_list} FROM {target}"))
        .map_err(query_error(&context))?;
    let mut rows = stmt.query([]).map_err(query_error(&context))?;

    let mut count = 0u64;
    let mut line = String::new();
    while let Some(row) = rows.next().map_err(query_error(&context))? {
        if should_stop() {
            return Err(DumpError::Cancelled);
        }
        line.clear();
        let _ = write!(line, "INSERT INTO {target} ({column_list}) VALUES (");
        for i in 0..columns.len() {
            if i > 0 {
                line.push_str(", ");
            }
            let value = row.get_ref(i).map_err(query_error(&context))?;
            line.push_str(&render_value(value));
        }
        line.push_str(");");
        writer.statement(&line)?;
        count += 1;
    }
    Ok(count)
}

/// AUTOINCREMENT counters, so replayed tables continue where they left off
fn dump_sequences(conn: &Connection, writer: &mut ArtifactWriter) -> Result<(), DumpError> {
    let exists: bool = conn
        .query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE name = 'sqlite_sequence')",
            [],
            |row| row.get(0),
        )
        .map_err(query_error("sqlite_sequence"))?;
    if !exists {
        return Ok(());
    }

    let mut stmt = conn
        .prepare("SELECT name, seq FROM sqlite_sequence ORDER BY name")
        .map_err(query_error("sqlite_sequence"))?;
    let sequences = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(query_error("sqlite_sequence"))?;

    writer.statement("DELETE FROM sqlite_sequence;")?;
    for (name, seq) in sequences {
        writer.statement(&format!(
            "INSERT INTO sqlite_sequence (name, seq) VALUES ({}, {seq});",
            quote_literal(Dialect::Sqlite, &name)
        ))?;
    }
    Ok(())
}

/// Render one stored value as a SQLite literal
fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) if f.is_nan() => "NULL".to_string(),
        ValueRef::Real(f) if f.is_infinite() => {
            if f > 0.0 { "9e999" } else { "-9e999" }.to_string()
        }
        ValueRef::Real(f) => format!("{f:?}"),
        ValueRef::Text(bytes) => quote_literal(Dialect::Sqlite, &String::from_utf8_lossy(bytes)),
        ValueRef::Blob(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2 + 3);
            hex.push_str("X'");
            for byte in bytes {
                let _ = write!(hex, "{byte:02X}");
            }
            hex.push('\'');
            hex
        }
    }
}
