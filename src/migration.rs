//! Ordered, idempotent schema migrations.
//!
//! Applied identifiers are recorded in the `grdb_migrations` meta table;
//! running the migrator again only applies what is missing.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::config::TransactionKind;
use crate::connection::Database;
use crate::error::{Error, Result};
use crate::facade::DatabaseWriter;
use crate::row::Row;

type MigrationBody = Box<dyn Fn(&mut Database) -> Result<()> + Send + Sync>;

/// How foreign keys are enforced while a migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForeignKeyCheckMode {
    /// FK enforcement stays on; violations fail statements as they run.
    Immediate,
    /// FK enforcement is disabled for the migration body; a full
    /// `foreign_key_check` runs before commit and any violation aborts.
    Deferred,
}

struct Migration {
    identifier: String,
    mode: ForeignKeyCheckMode,
    body: MigrationBody,
}

/// An ordered list of named migrations.
#[derive(Default)]
pub struct Migrator {
    migrations: Vec<Arc<Migration>>,
}

impl Migrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration. Identifiers must be unique; registration order
    /// is application order.
    pub fn register<F>(&mut self, identifier: &str, body: F)
    where
        F: Fn(&mut Database) -> Result<()> + Send + Sync + 'static,
    {
        self.push(identifier, ForeignKeyCheckMode::Immediate, Box::new(body));
    }

    /// Register a migration that runs with foreign key enforcement disabled,
    /// validated by a full `PRAGMA foreign_key_check` before commit.
    pub fn register_with_deferred_foreign_key_check<F>(&mut self, identifier: &str, body: F)
    where
        F: Fn(&mut Database) -> Result<()> + Send + Sync + 'static,
    {
        self.push(identifier, ForeignKeyCheckMode::Deferred, Box::new(body));
    }

    fn push(&mut self, identifier: &str, mode: ForeignKeyCheckMode, body: MigrationBody) {
        assert!(
            !self
                .migrations
                .iter()
                .any(|migration| migration.identifier == identifier),
            "duplicate migration identifier: {identifier}"
        );
        self.migrations.push(Arc::new(Migration {
            identifier: identifier.to_owned(),
            mode,
            body,
        }));
    }

    /// Identifiers in registration order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        self.migrations
            .iter()
            .map(|migration| migration.identifier.as_str())
            .collect()
    }

    /// Apply every unapplied migration, in order.
    ///
    /// # Errors
    /// Stops at the first failing migration and propagates its error; the
    /// failing migration's transaction is rolled back and its identifier is
    /// not recorded.
    pub fn migrate<W: DatabaseWriter>(&self, writer: &W) -> Result<()> {
        let migrations: Vec<Arc<Migration>> = self.migrations.clone();
        writer.write(move |db| {
            db.execute(
                "CREATE TABLE IF NOT EXISTS grdb_migrations (identifier TEXT NOT NULL PRIMARY KEY)",
                (),
            )?;
            let applied: HashSet<String> =
                Row::fetch_all(db, "SELECT identifier FROM grdb_migrations ORDER BY rowid", ())?
                    .iter()
                    .map(|row| row.decode::<String>("identifier"))
                    .collect::<Result<_>>()?;
            for migration in &migrations {
                if applied.contains(&migration.identifier) {
                    continue;
                }
                apply(db, migration)?;
            }
            Ok(())
        })
    }

    /// Identifiers recorded as applied in the database.
    ///
    /// # Errors
    /// Propagates statement errors. An absent meta table reads as empty.
    pub fn applied_identifiers<W: DatabaseWriter>(&self, writer: &W) -> Result<Vec<String>> {
        writer.write(|db| {
            if !db.table_exists("grdb_migrations")? {
                return Ok(Vec::new());
            }
            Row::fetch_all(db, "SELECT identifier FROM grdb_migrations ORDER BY rowid", ())?
                .iter()
                .map(|row| row.decode::<String>("identifier"))
                .collect()
        })
    }
}

fn apply(db: &mut Database, migration: &Migration) -> Result<()> {
    debug!(identifier = %migration.identifier, "applying migration");
    match migration.mode {
        ForeignKeyCheckMode::Immediate => {
            db.transaction(Some(TransactionKind::Immediate), |db| {
                (migration.body)(db)?;
                record_identifier(db, &migration.identifier)
            })
        }
        ForeignKeyCheckMode::Deferred => {
            let restore = foreign_keys_enabled(db)?;
            db.execute("PRAGMA foreign_keys = OFF", ())?;
            let result = db.transaction(Some(TransactionKind::Immediate), |db| {
                (migration.body)(db)?;
                let violations = Row::fetch_all(db, "PRAGMA foreign_key_check", ())?;
                if !violations.is_empty() {
                    return Err(Error::Schema(format!(
                        "foreign key violations after migration {} ({} row(s))",
                        migration.identifier,
                        violations.len()
                    )));
                }
                record_identifier(db, &migration.identifier)
            });
            // FK state is restored on every exit path.
            let restored = db.execute(
                if restore {
                    "PRAGMA foreign_keys = ON"
                } else {
                    "PRAGMA foreign_keys = OFF"
                },
                (),
            );
            result.and(restored)
        }
    }
}

fn record_identifier(db: &mut Database, identifier: &str) -> Result<()> {
    db.execute(
        "INSERT INTO grdb_migrations (identifier) VALUES (?)",
        [identifier],
    )
}

fn foreign_keys_enabled(db: &mut Database) -> Result<bool> {
    match Row::fetch_one(db, "PRAGMA foreign_keys", ())? {
        Some(row) => Ok(row.decode_at::<bool>(0).unwrap_or(false)),
        None => Ok(false),
    }
}
