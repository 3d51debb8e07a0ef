//! Driver-introspection dump for PostgreSQL.
//!
//! Runs inside a read-only repeatable-read transaction so the artifact is a
//! consistent snapshot. Rows are pulled through a server-side cursor in
//! fixed batches using the simple query protocol, which hands every value
//! back in its text form.

use std::path::Path;

use async_trait::async_trait;
use strongbox_core::{
    ArtifactFormat, CancelSignal, DatastoreConnectionInfo, DumpError, DumpMode, Engine,
};
use tokio_postgres::{IsolationLevel, SimpleQueryMessage, Transaction};

use super::catalog::{Catalog, Column, Table};
use super::{connect, error_detail};
use crate::sql::{Dialect, if_not_exists, one_line, quote_ident, quote_literal, terminated};
use crate::strategy::{DumpStats, DumpStrategy};
use crate::writer::ArtifactWriter;

/// Rows fetched per cursor round trip
pub const FETCH_SIZE: usize = 500;

const CURSOR: &str = "strongbox_rows";

const SESSION_SETTINGS: [&str; 5] = [
    "SET statement_timeout = 0;",
    "SET lock_timeout = 0;",
    "SET client_encoding = 'UTF8';",
    "SET standard_conforming_strings = on;",
    "SET check_function_bodies = false;",
];

#[derive(Debug, Clone)]
pub struct PostgresDriverDump {
    info: DatastoreConnectionInfo,
    fetch_size: usize,
}

impl PostgresDriverDump {
    pub fn new(info: DatastoreConnectionInfo) -> Self {
        Self {
            info,
            fetch_size: FETCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    async fn dump_rows(
        &self,
        tx: &Transaction<'_>,
        table: &Table,
        writer: &mut ArtifactWriter,
        cancel: &CancelSignal,
    ) -> Result<u64, DumpError> {
        let query_error = |e: tokio_postgres::Error| DumpError::Query {
            context: format!("rows of {}", table.name),
            reason: error_detail(&e),
        };

        let columns: Vec<&Column> = table.insertable().collect();
        let column_list = columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let target = table.qualified();
        let insert_prefix = if columns.is_empty() {
            format!("INSERT INTO {target}")
        } else if table.needs_override() {
            format!("INSERT INTO {target} ({column_list}) OVERRIDING SYSTEM VALUE VALUES")
        } else {
            format!("INSERT INTO {target} ({column_list}) VALUES")
        };

        tx.batch_execute(&format!(
            "DECLARE {CURSOR} NO SCROLL CURSOR FOR SELECT {column_list} FROM {target}"
        ))
        .await
        .map_err(query_error)?;

        let fetch = format!("FETCH {} FROM {CURSOR}", self.fetch_size);
        let mut rows = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(DumpError::Cancelled);
            }
            let messages = tx.simple_query(&fetch).await.map_err(query_error)?;
            let mut fetched = 0usize;
            for message in messages {
                if let SimpleQueryMessage::Row(row) = message {
                    fetched += 1;
                    if columns.is_empty() {
                        writer.statement(&format!("{insert_prefix} DEFAULT VALUES;"))?;
                        continue;
                    }
                    let values = columns
                        .iter()
                        .enumerate()
                        .map(|(i, column)| render_value(column, row.get(i)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    writer.statement(&format!("{insert_prefix} ({values});"))?;
                }
            }
            if fetched == 0 {
                break;
            }
            rows += fetched as u64;
        }

        tx.batch_execute(&format!("CLOSE {CURSOR}"))
            .await
            .map_err(query_error)?;
        Ok(rows)
    }
}

/// Render one text-protocol value as a SQL literal
pub(super) fn render_value(column: &Column, value: Option<&str>) -> String {
    let Some(value) = value else {
        return "NULL".to_string();
    };
    match column.category {
        'B' => match value {
            "t" => "TRUE".to_string(),
            "f" => "FALSE".to_string(),
            other => quote_literal(Dialect::Postgres, other),
        },
        'N' if column.data_type != "money"
            && !matches!(value, "NaN" | "Infinity" | "-Infinity") =>
        {
            value.to_string()
        }
        _ => quote_literal(Dialect::Postgres, value),
    }
}

#[async_trait]
impl DumpStrategy for PostgresDriverDump {
    fn engine(&self) -> Engine {
        Engine::Postgresql
    }

    fn mode(&self) -> DumpMode {
        DumpMode::Driver
    }

    fn format(&self) -> ArtifactFormat {
        ArtifactFormat::Sql
    }

    async fn dump(&self, target: &Path, cancel: &CancelSignal) -> Result<DumpStats, DumpError> {
        let mut client = connect(&self.info)
            .await
            .map_err(|reason| DumpError::Connect {
                engine: Engine::Postgresql,
                reason,
            })?;

        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await
            .map_err(|e| DumpError::Query {
                context: "snapshot".to_string(),
                reason: error_detail(&e),
            })?;

        let catalog = Catalog::load(&tx).await?;
        tracing::debug!(
            types = catalog.enums.len() + catalog.domains.len(),
            tables = catalog.tables.len(),
            views = catalog.views.len(),
            sequences = catalog.sequences.len(),
            foreign_keys = catalog.foreign_keys.len(),
            "Loaded PostgreSQL catalog"
        );

        let mut writer = ArtifactWriter::create(target, ArtifactFormat::Sql)?;
        writer.comment(&format!(
            "Strongbox backup of postgresql database \"{}\"",
            self.info.database
        ))?;
        writer.comment(&format!("Created {}", chrono::Local::now().to_rfc3339()))?;
        for setting in SESSION_SETTINGS {
            writer.statement(setting)?;
        }
        writer.blank()?;

        for fk in &catalog.foreign_keys {
            writer.statement(&fk.drop_sql())?;
        }
        for enum_type in &catalog.enums {
            writer.statement(&enum_type.create_sql())?;
        }
        for domain in &catalog.domains {
            writer.statement(&domain.create_sql())?;
        }
        for sequence in &catalog.sequences {
            writer.statement(&sequence.create_sql())?;
        }

        let mut stats = DumpStats::default();
        for table in &catalog.tables {
            writer.blank()?;
            writer.comment(&format!("Table: {}", table.name))?;
            writer.statement(&table.create_sql())?;
            writer.statement(&format!("TRUNCATE TABLE {} CASCADE;", table.qualified()))?;

            let rows = self.dump_rows(&tx, table, &mut writer, cancel).await?;
            tracing::debug!(table = %table.name, rows, "Dumped table");
            stats.tables += 1;
            stats.rows += rows;
        }

        writer.blank()?;
        for table in &catalog.tables {
            for index in &table.indexes {
                writer.statement(&terminated(&if_not_exists(&one_line(index))))?;
            }
        }
        for sequence in &catalog.sequences {
            if let Some(owned_by) = sequence.owned_by_sql() {
                writer.statement(&owned_by)?;
            }
            if let Some(setval) = sequence.setval_sql() {
                writer.statement(&setval)?;
            }
        }
        for table in &catalog.tables {
            for setval in table.identity_setvals() {
                writer.statement(&setval)?;
            }
        }
        for view in &catalog.views {
            writer.statement(&view.create_sql())?;
        }
        for fk in &catalog.foreign_keys {
            writer.statement(&fk.add_sql())?;
        }

        // Read-only snapshot; nothing to keep
        if let Err(e) = tx.rollback().await {
            tracing::debug!(error = %error_detail(&e), "Failed to close dump snapshot");
        }

        writer.finish_blocking().await?;
        Ok(stats)
    }
}
