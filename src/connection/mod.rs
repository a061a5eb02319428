//! A single SQLite connection and the operations it supports.
//!
//! A [`Database`] wraps one `rusqlite::Connection`, pinned to the serialized
//! worker that created it. All statement compilation goes through a
//! compile-time authorizer that records read tables, written tables and
//! schema mutations; execution goes through the connection's prepared
//! statement cache and reports transaction boundaries to the observation
//! broker.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

use rusqlite::OpenFlags;
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::functions::FunctionFlags;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use tracing::debug;

pub(crate) mod schema;

pub use schema::PrimaryKey;

use crate::config::{BusyMode, Config, TransactionKind};
use crate::error::{Error, Result};
use crate::observation::{ObservationBroker, TransactionObserver};
use crate::record::persistence::PersistenceSqlKey;
use crate::row::{ColumnLayout, Row};
use crate::statement::{
    Changes, ParameterInfo, SelectStatement, StatementArguments, UpdateStatement,
};
use crate::value::Value;
use crate::worker::QueueStamp;
use schema::{ColumnInfo, SchemaCache, SharedSchemaCache, quote_identifier};

/// What the authorizer saw while one statement compiled.
#[derive(Debug, Clone, Default)]
struct CompileState {
    read_tables: BTreeSet<String>,
    written_tables: BTreeSet<String>,
    mutates_schema: bool,
}

/// One open SQLite connection.
///
/// Connections are created by the façades and handed to closures running on
/// the connection's worker; they cannot be constructed directly.
pub struct Database {
    conn: rusqlite::Connection,
    config: Config,
    stamp: QueueStamp,
    observation: Arc<ObservationBroker>,
    schema: SchemaCache,
    shared_schema: Option<SharedSchemaCache>,
    select_cache: HashMap<String, SelectStatement>,
    update_cache: HashMap<String, UpdateStatement>,
    pub(crate) persistence_sql: HashMap<PersistenceSqlKey, Arc<String>>,
}

impl Database {
    pub(crate) fn open(
        path: &str,
        config: Config,
        shared_schema: Option<SharedSchemaCache>,
        stamp: QueueStamp,
    ) -> Result<Self> {
        let flags = if config.readonly {
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI
        };
        let mut conn = rusqlite::Connection::open_with_flags(path, flags)?;

        if let Some(capacity) = config.statement_cache_capacity {
            conn.set_prepared_statement_cache_capacity(capacity);
        }
        match config.busy_mode {
            BusyMode::ImmediateError => {}
            BusyMode::Timeout(duration) => conn.busy_timeout(duration)?,
            BusyMode::Callback(callback) => conn.busy_handler(Some(callback))?,
        }
        if let Some(tracer) = config.trace {
            conn.trace(Some(tracer));
        }
        conn.pragma_update(None, "foreign_keys", config.foreign_keys_enabled)?;

        let observation = ObservationBroker::new();
        observation.install(&conn);

        let mut db = Self {
            conn,
            config,
            stamp,
            observation,
            schema: SchemaCache::default(),
            shared_schema,
            select_cache: HashMap::new(),
            update_cache: HashMap::new(),
            persistence_sql: HashMap::new(),
        };
        if let Some(prepare) = db.config.prepare_connection.clone() {
            prepare(&mut db)?;
        }
        debug!(path, readonly = db.config.readonly, "connection opened");
        Ok(db)
    }

    /// Switch the file to WAL journaling with NORMAL synchronous writes.
    pub(crate) fn activate_wal(&self) -> Result<()> {
        let mode: String =
            self.conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        // In-memory databases report "memory"; that is fine.
        if !mode.eq_ignore_ascii_case("wal") && !mode.eq_ignore_ascii_case("memory") {
            return Err(Error::Schema(format!(
                "could not activate WAL journaling (got {mode})"
            )));
        }
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(())
    }

    fn ensure_worker(&self) -> Result<()> {
        match crate::worker::current_stamp() {
            Some(stamp) if stamp == self.stamp => Ok(()),
            _ => Err(Error::WrongThread(format!(
                "connection is pinned to {:?}",
                self.stamp
            ))),
        }
    }

    // ---- compilation ---------------------------------------------------

    fn compile(&self, sql: &str) -> Result<(ParameterInfo, CompileState, bool)> {
        let state = Arc::new(Mutex::new(CompileState::default()));
        let hook_state = Arc::clone(&state);
        self.conn.authorizer(Some(move |ctx: AuthContext<'_>| {
            if let Ok(mut state) = hook_state.lock() {
                record_action(&mut state, &ctx.action);
            }
            Authorization::Allow
        }));
        let compiled = self.conn.prepare(sql);
        self.conn
            .authorizer(None::<fn(AuthContext<'_>) -> Authorization>);

        let stmt = compiled.map_err(|err| Error::from_sqlite(err, sql, None))?;
        let count = stmt.parameter_count();
        let mut names = Vec::with_capacity(count);
        for index in 1..=count {
            names.push(stmt.parameter_name(index).and_then(strip_parameter_prefix));
        }
        let readonly = stmt.readonly();
        drop(stmt);

        let observed = state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default();
        Ok((ParameterInfo { count, names }, observed, readonly))
    }

    /// Compile a read-only statement. Statements are cached per connection by
    /// their SQL text until the schema changes.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on compile failure and [`Error::Argument`]
    /// when the statement is not read-only.
    pub fn prepare_select(&mut self, sql: &str) -> Result<SelectStatement> {
        self.ensure_worker()?;
        if let Some(statement) = self.select_cache.get(sql) {
            return Ok(statement.clone());
        }
        let (parameters, observed, readonly) = self.compile(sql)?;
        if !readonly {
            return Err(Error::Argument(format!(
                "not a read-only statement: {sql}"
            )));
        }
        let statement = SelectStatement {
            sql: Arc::new(sql.to_owned()),
            parameters,
            read_tables: Arc::new(observed.read_tables),
            arguments: None,
        };
        self.select_cache.insert(sql.to_owned(), statement.clone());
        Ok(statement)
    }

    /// Compile a statement that may write. Cached like select statements.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on compile failure.
    pub fn prepare_update(&mut self, sql: &str) -> Result<UpdateStatement> {
        self.ensure_worker()?;
        if let Some(statement) = self.update_cache.get(sql) {
            return Ok(statement.clone());
        }
        let (parameters, observed, _) = self.compile(sql)?;
        let statement = UpdateStatement {
            sql: Arc::new(sql.to_owned()),
            parameters,
            written_tables: Arc::new(observed.written_tables),
            mutates_schema: observed.mutates_schema,
            arguments: None,
        };
        self.update_cache.insert(sql.to_owned(), statement.clone());
        Ok(statement)
    }

    // ---- execution -----------------------------------------------------

    /// Execute one or more `;`-separated statements.
    ///
    /// Positional arguments are consumed prefix-wise: each statement takes as
    /// many values as it declares parameters and leaves the rest to its
    /// siblings. Named arguments are shared by every statement.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] with statement context on failure,
    /// [`Error::Argument`] on argument mismatch, [`Error::CommitVetoed`] when
    /// an observer rejected a commit.
    pub fn execute(
        &mut self,
        sql: &str,
        arguments: impl Into<StatementArguments>,
    ) -> Result<()> {
        self.ensure_worker()?;
        let mut remaining: StatementArguments = arguments.into();
        let state = Arc::new(Mutex::new(CompileState::default()));
        let hook_state = Arc::clone(&state);
        self.conn.authorizer(Some(move |ctx: AuthContext<'_>| {
            if let Ok(mut state) = hook_state.lock() {
                record_action(&mut state, &ctx.action);
            }
            Authorization::Allow
        }));

        let run = (|| -> Result<()> {
            let mut batch = rusqlite::Batch::new(&self.conn, sql);
            while let Some(mut stmt) = batch
                .next()
                .map_err(|err| Error::from_sqlite(err, sql, None))?
            {
                let count = stmt.parameter_count();
                let statement_arguments = remaining.consume_prefix(count)?;
                bind_live(&mut stmt, &statement_arguments)
                    .map_err(|err| Error::from_sqlite(err, sql, None))?;
                let step = if stmt.column_count() > 0 {
                    // Statements returning rows are stepped to completion.
                    let mut rows = stmt.raw_query();
                    loop {
                        match rows.next() {
                            Ok(Some(_)) => {}
                            Ok(None) => break Ok(()),
                            Err(err) => break Err(err),
                        }
                    }
                } else {
                    stmt.raw_execute().map(|_| ())
                };
                step.map_err(|err| Error::from_sqlite(err, sql, None))?;
            }
            if remaining.remaining_count() > 0 {
                return Err(Error::Argument(format!(
                    "{} unused statement argument(s)",
                    remaining.remaining_count()
                )));
            }
            Ok(())
        })();

        self.conn
            .authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
        let observed = state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default();
        if observed.mutates_schema {
            self.invalidate_schema_caches();
        }
        self.finish_statements(run)
    }

    /// Execute a batch of statements with no arguments.
    ///
    /// # Errors
    /// See [`Database::execute`].
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.execute(sql, ())
    }

    pub(crate) fn execute_select_statement(
        &mut self,
        statement: &mut SelectStatement,
    ) -> Result<Vec<Row>> {
        self.ensure_worker()?;
        let arguments = statement.take_arguments()?;
        let context = argument_context(&arguments, &statement.parameters);
        let sql = Arc::clone(&statement.sql);
        let fetch = (|| -> rusqlite::Result<Vec<Row>> {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            bind_compiled(&mut stmt, &arguments, &statement.parameters)?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(ToString::to_string).collect();
            let column_count = column_names.len();
            let layout = ColumnLayout::new(column_names);
            let mut rows = stmt.raw_query();
            let mut fetched = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(column_count);
                for index in 0..column_count {
                    values.push(Value::from_sqlite_ref(row.get_ref(index)?));
                }
                fetched.push(Row::new(Arc::clone(&layout), values));
            }
            Ok(fetched)
        })();
        let result = fetch.map_err(|err| Error::from_sqlite(err, &sql, Some(&context)));
        self.finish_statements(result)
    }

    pub(crate) fn execute_select_statement_first(
        &mut self,
        statement: &mut SelectStatement,
    ) -> Result<Option<Row>> {
        self.ensure_worker()?;
        let arguments = statement.take_arguments()?;
        let context = argument_context(&arguments, &statement.parameters);
        let sql = Arc::clone(&statement.sql);
        let fetch = (|| -> rusqlite::Result<Option<Row>> {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            bind_compiled(&mut stmt, &arguments, &statement.parameters)?;
            let column_names: Vec<String> =
                stmt.column_names().iter().map(ToString::to_string).collect();
            let column_count = column_names.len();
            let layout = ColumnLayout::new(column_names);
            let mut rows = stmt.raw_query();
            match rows.next()? {
                Some(row) => {
                    let mut values = Vec::with_capacity(column_count);
                    for index in 0..column_count {
                        values.push(Value::from_sqlite_ref(row.get_ref(index)?));
                    }
                    Ok(Some(Row::new(layout, values)))
                }
                None => Ok(None),
            }
        })();
        let result = fetch.map_err(|err| Error::from_sqlite(err, &sql, Some(&context)));
        self.finish_statements(result)
    }

    pub(crate) fn execute_update_statement(
        &mut self,
        statement: &mut UpdateStatement,
    ) -> Result<Changes> {
        self.ensure_worker()?;
        let arguments = statement.take_arguments()?;
        let context = argument_context(&arguments, &statement.parameters);
        let sql = Arc::clone(&statement.sql);
        let run = (|| -> rusqlite::Result<usize> {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            bind_compiled(&mut stmt, &arguments, &statement.parameters)?;
            stmt.raw_execute()
        })();
        let result = match run {
            Ok(changed_row_count) => {
                let last_inserted_row_id = if changed_row_count > 0 {
                    Some(self.conn.last_insert_rowid())
                } else {
                    None
                };
                Ok(Changes {
                    changed_row_count,
                    last_inserted_row_id,
                })
            }
            Err(err) => Err(Error::from_sqlite(err, &sql, Some(&context))),
        };
        if statement.mutates_schema && result.is_ok() {
            self.invalidate_schema_caches();
        }
        self.finish_statements(result)
    }

    /// Dispatch transaction boundaries recorded by the hooks, then map a
    /// pending commit veto onto the statement's error.
    fn finish_statements<T>(&mut self, result: Result<T>) -> Result<T> {
        let broker = Arc::clone(&self.observation);
        let (boundaries, veto) = broker.take_pending();
        for boundary in boundaries {
            broker.dispatch_boundary(boundary, self);
        }
        match veto {
            Some(err) if result.is_err() => Err(Error::CommitVetoed(Arc::new(err))),
            _ => result,
        }
    }

    // ---- transactions --------------------------------------------------

    /// Begin an explicit transaction.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when SQLite refuses (e.g. nested BEGIN).
    pub fn begin_transaction(&mut self, kind: TransactionKind) -> Result<()> {
        self.execute(kind.begin_sql(), ())
    }

    /// Commit the open transaction.
    ///
    /// # Errors
    /// Returns [`Error::CommitVetoed`] when an observer rejected it, or
    /// [`Error::Sqlite`] for engine failures.
    pub fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT TRANSACTION", ())
    }

    /// Roll the open transaction back.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on engine failure.
    pub fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK TRANSACTION", ())
    }

    /// True when no explicit transaction is open.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.conn.is_autocommit()
    }

    /// Run `f` inside a transaction of the given kind (the configured default
    /// when `None`). Commits on `Ok`, rolls back on `Err`.
    ///
    /// When the body failed with one of SQLite's FULL/IOERR/BUSY/NOMEM codes
    /// the engine may already have rolled back; a failing explicit ROLLBACK
    /// is swallowed in that case and the body's error is returned.
    ///
    /// # Errors
    /// Propagates the body's error, a commit failure, or a rollback failure.
    pub fn transaction<T, F>(&mut self, kind: Option<TransactionKind>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let kind = kind.unwrap_or(self.config.default_transaction_kind);
        self.begin_transaction(kind)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if !self.is_autocommit() {
                    match self.rollback() {
                        Ok(()) => {}
                        Err(rollback_err) => {
                            if !err.sqlite_aborted_transaction() {
                                return Err(rollback_err);
                            }
                        }
                    }
                }
                Err(err)
            }
        }
    }

    // ---- schema --------------------------------------------------------

    /// The primary key of `table`, from the cache or `PRAGMA table_info`.
    ///
    /// # Errors
    /// Returns [`Error::Schema`] when the table does not exist.
    pub fn primary_key(&mut self, table: &str) -> Result<Arc<PrimaryKey>> {
        self.ensure_worker()?;
        if let Some(key) = self.schema.primary_key(table) {
            return Ok(key);
        }
        if let Some(shared) = &self.shared_schema
            && let Some(key) = shared.primary_key(table)
        {
            self.schema.store_primary_key(table, Arc::clone(&key));
            return Ok(key);
        }
        let columns = self.columns_in_table(table)?;
        if columns.is_empty() {
            return Err(Error::Schema(format!("no such table: {table}")));
        }
        let key = Arc::new(schema::primary_key_from_columns(&columns));
        self.schema.store_primary_key(table, Arc::clone(&key));
        if let Some(shared) = &self.shared_schema {
            shared.store_primary_key(table, Arc::clone(&key));
        }
        Ok(key)
    }

    /// Whether a table of that name exists in the main database.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on engine failure.
    pub fn table_exists(&mut self, table: &str) -> Result<bool> {
        self.ensure_worker()?;
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND LOWER(name) = LOWER(?1)",
                [table],
                |row| row.get(0),
            )
            .map_err(Error::from)?;
        Ok(count > 0)
    }

    pub(crate) fn columns_in_table(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let sql = format!("PRAGMA table_info({})", quote_identifier(table));
        let fetch = (|| -> rusqlite::Result<Vec<ColumnInfo>> {
            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut columns = Vec::new();
            while let Some(row) = rows.next()? {
                columns.push(ColumnInfo {
                    name: row.get(1)?,
                    sql_type: row.get(2)?,
                    primary_key_position: row.get(5)?,
                });
            }
            Ok(columns)
        })();
        fetch.map_err(|err| Error::from_sqlite(err, &sql, None))
    }

    fn invalidate_schema_caches(&mut self) {
        self.schema.clear();
        if let Some(shared) = &self.shared_schema {
            shared.clear();
        }
        self.select_cache.clear();
        self.update_cache.clear();
        self.persistence_sql.clear();
        self.conn.flush_prepared_statement_cache();
    }

    // ---- functions & collations ----------------------------------------

    /// Register a scalar SQL function.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when registration fails.
    pub fn add_function<F>(
        &self,
        name: &str,
        arg_count: usize,
        deterministic: bool,
        function: F,
    ) -> Result<()>
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let mut flags = FunctionFlags::SQLITE_UTF8;
        if deterministic {
            flags |= FunctionFlags::SQLITE_DETERMINISTIC;
        }
        let function = std::panic::AssertUnwindSafe(function);
        self.conn
            .create_scalar_function(name, arg_count as i32, flags, move |ctx| {
                let mut values = Vec::with_capacity(ctx.len());
                for index in 0..ctx.len() {
                    values.push(Value::from_sqlite_ref(ctx.get_raw(index)));
                }
                (function.0)(&values)
                    .map(Value::into_sqlite)
                    .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))
            })
            .map_err(Error::from)
    }

    /// Remove a scalar SQL function registered with [`Database::add_function`].
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when removal fails.
    pub fn remove_function(&self, name: &str, arg_count: usize) -> Result<()> {
        self.conn
            .remove_function(name, arg_count as i32)
            .map_err(Error::from)
    }

    /// Register a collation.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when registration fails.
    pub fn add_collation<C>(&self, name: &str, compare: C) -> Result<()>
    where
        C: Fn(&str, &str) -> std::cmp::Ordering + Send + Sync + 'static,
    {
        let compare = std::panic::AssertUnwindSafe(compare);
        self.conn
            .create_collation(name, move |a, b| (compare.0)(a, b))
            .map_err(Error::from)
    }

    /// Remove a collation registered with [`Database::add_collation`].
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] when removal fails.
    pub fn remove_collation(&self, name: &str) -> Result<()> {
        self.conn.remove_collation(name).map_err(Error::from)
    }

    // ---- observation ---------------------------------------------------

    /// Register a transaction observer. The observer is held weakly; keep an
    /// `Arc` alive for as long as events should flow.
    pub fn add_transaction_observer(&self, observer: &Arc<dyn TransactionObserver>) {
        self.observation.add_observer(Arc::downgrade(observer));
    }

    /// Register from a weak reference.
    pub fn add_weak_transaction_observer(&self, observer: Weak<dyn TransactionObserver>) {
        self.observation.add_observer(observer);
    }

    /// Remove a previously registered observer.
    pub fn remove_transaction_observer(&self, observer: &Arc<dyn TransactionObserver>) {
        self.observation.remove_observer(observer);
    }

    // ---- maintenance ---------------------------------------------------

    /// Rowid assigned by the most recent successful INSERT on this
    /// connection.
    #[must_use]
    pub fn last_inserted_row_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Total number of rows changed since the connection opened.
    #[must_use]
    pub fn total_changes(&self) -> u64 {
        self.conn.total_changes() as u64
    }

    /// Free as much memory as SQLite can, and drop this connection's caches.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on engine failure.
    pub fn release_memory(&mut self) -> Result<()> {
        self.schema.clear();
        self.select_cache.clear();
        self.update_cache.clear();
        self.persistence_sql.clear();
        self.conn.flush_prepared_statement_cache();
        self.conn.release_memory().map_err(Error::from)
    }

    /// Truncating WAL checkpoint.
    ///
    /// # Errors
    /// Returns [`Error::Sqlite`] on engine failure.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(Error::from)
    }
}

fn record_action(state: &mut CompileState, action: &AuthAction<'_>) {
    match action {
        AuthAction::Read { table_name, .. } => {
            state.read_tables.insert((*table_name).to_owned());
        }
        AuthAction::Insert { table_name, .. } => {
            state.written_tables.insert((*table_name).to_owned());
        }
        AuthAction::Update { table_name, .. } => {
            state.written_tables.insert((*table_name).to_owned());
        }
        AuthAction::Delete { table_name, .. } => {
            state.written_tables.insert((*table_name).to_owned());
        }
        AuthAction::CreateTable { .. }
        | AuthAction::CreateIndex { .. }
        | AuthAction::CreateTrigger { .. }
        | AuthAction::CreateView { .. }
        | AuthAction::CreateVtable { .. }
        | AuthAction::CreateTempTable { .. }
        | AuthAction::CreateTempIndex { .. }
        | AuthAction::CreateTempTrigger { .. }
        | AuthAction::CreateTempView { .. }
        | AuthAction::DropTable { .. }
        | AuthAction::DropIndex { .. }
        | AuthAction::DropTrigger { .. }
        | AuthAction::DropView { .. }
        | AuthAction::DropVtable { .. }
        | AuthAction::DropTempTable { .. }
        | AuthAction::DropTempIndex { .. }
        | AuthAction::DropTempTrigger { .. }
        | AuthAction::DropTempView { .. }
        | AuthAction::AlterTable { .. }
        | AuthAction::Reindex { .. } => {
            state.mutates_schema = true;
        }
        _ => {}
    }
}

fn strip_parameter_prefix(name: &str) -> Option<String> {
    match name.as_bytes().first() {
        Some(b':' | b'@' | b'$') => Some(name[1..].to_owned()),
        // "?NNN" numbered parameters have no usable name.
        _ => None,
    }
}

/// Bind validated arguments to a compiled statement using its recorded
/// parameter metadata.
fn bind_compiled(
    stmt: &mut rusqlite::Statement<'_>,
    arguments: &StatementArguments,
    parameters: &ParameterInfo,
) -> rusqlite::Result<()> {
    match arguments {
        StatementArguments::Empty => Ok(()),
        StatementArguments::Positional(values) => {
            for (index, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(index + 1, value)?;
            }
            Ok(())
        }
        StatementArguments::Named(values) => {
            for index in 1..=parameters.count {
                // Validation guaranteed a name and a value for every slot.
                if let Some(Some(name)) = parameters.names.get(index - 1)
                    && let Some(value) = values.get(name)
                {
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
            Ok(())
        }
    }
}

/// Bind arguments to a statement whose metadata was not recorded (script
/// execution), reading parameter names from the live handle.
fn bind_live(
    stmt: &mut rusqlite::Statement<'_>,
    arguments: &StatementArguments,
) -> rusqlite::Result<()> {
    match arguments {
        StatementArguments::Empty => Ok(()),
        StatementArguments::Positional(values) => {
            for (index, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(index + 1, value)?;
            }
            Ok(())
        }
        StatementArguments::Named(values) => {
            for index in 1..=stmt.parameter_count() {
                let name = stmt
                    .parameter_name(index)
                    .and_then(strip_parameter_prefix);
                if let Some(name) = name
                    && let Some(value) = values.get(&name)
                {
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
            Ok(())
        }
    }
}

/// Argument values in binding order, for error descriptions.
fn argument_context(arguments: &StatementArguments, parameters: &ParameterInfo) -> Vec<Value> {
    match arguments {
        StatementArguments::Empty => Vec::new(),
        StatementArguments::Positional(values) => values.clone(),
        StatementArguments::Named(values) => parameters
            .names
            .iter()
            .filter_map(|name| {
                name.as_ref()
                    .and_then(|name| values.get(name))
                    .cloned()
            })
            .collect(),
    }
}
