use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ErrorKind, EtlResult};
use crate::state::rows::StateRow;
use crate::state::snapshot;
use crate::state::table::StateTable;
use crate::state::validators;
use crate::types::{Row, scalar_key};
use crate::{bail, etl_error};

/// Predicate run against every row written to a table.
pub type Validator = Box<dyn Fn(&Row) -> EtlResult<()> + Send + Sync>;

/// Column set on rows removed by [`StateStore::discard`].
pub const DELETED_COLUMN: &str = "deleted";

/// Returns whether `row` was discarded.
pub fn is_deleted(row: &Row) -> bool {
    row.get(DELETED_COLUMN)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Rows of one table together with the indexes of its unique columns.
#[derive(Debug, Clone, Default)]
struct TableData {
    rows: BTreeMap<String, Row>,
    unique: HashMap<&'static str, HashMap<String, String>>,
}

impl TableData {
    fn check_unique(&self, table: StateTable, key: &str, row: &Row) -> EtlResult<()> {
        if is_deleted(row) {
            return Ok(());
        }

        for column in table.unique_columns() {
            let Some(value) = row.get(*column).and_then(scalar_key) else {
                continue;
            };

            let owner = self
                .unique
                .get(column)
                .and_then(|index| index.get(&value))
                .filter(|owner| owner.as_str() != key);
            if let Some(owner) = owner {
                bail!(
                    ErrorKind::DuplicateKey,
                    "Unique state column already taken",
                    format!("{table}.{column} = {value} is used by `{owner}`")
                );
            }
        }

        Ok(())
    }

    /// Stores `row` under `key` and returns the row it replaced. Deleted rows keep their key
    /// but release their unique values.
    fn insert(&mut self, table: StateTable, key: String, row: Row) -> Option<Row> {
        let previous = self.remove(table, &key);
        if !is_deleted(&row) {
            for column in table.unique_columns() {
                if let Some(value) = row.get(*column).and_then(scalar_key) {
                    self.unique
                        .entry(*column)
                        .or_default()
                        .insert(value, key.clone());
                }
            }
        }
        self.rows.insert(key, row);
        previous
    }

    fn remove(&mut self, table: StateTable, key: &str) -> Option<Row> {
        let row = self.rows.remove(key)?;
        for column in table.unique_columns() {
            let (Some(value), Some(index)) = (
                row.get(*column).and_then(scalar_key),
                self.unique.get_mut(column),
            ) else {
                continue;
            };
            if index.get(&value).is_some_and(|owner| owner == key) {
                index.remove(&value);
            }
        }
        Some(row)
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.unique.clear();
    }
}

#[derive(Default)]
struct TableState {
    persisted: TableData,
    cache: Option<TableData>,
    cache_enabled: bool,
    search_cache: HashMap<(String, String), Vec<String>>,
    validators: Vec<Validator>,
}

impl TableState {
    fn view(&self) -> &TableData {
        self.cache.as_ref().unwrap_or(&self.persisted)
    }

    fn view_mut(&mut self) -> &mut TableData {
        self.search_cache.clear();
        if self.cache_enabled {
            self.cache.get_or_insert_with(|| self.persisted.clone())
        } else {
            &mut self.persisted
        }
    }

    fn validate(&self, row: &Row) -> EtlResult<()> {
        if is_deleted(row) {
            return Ok(());
        }
        self.validators.iter().try_for_each(|validator| validator(row))
    }
}

/// Row overwritten while a savepoint is open.
struct Undo {
    table: StateTable,
    key: String,
    previous: Option<Row>,
}

/// Keyed in-memory store for the [`StateTable`] set.
///
/// Each table can opt into a write-through cache: writes land in the cache and
/// [`StateStore::flush_cache`] replaces the persisted table with it. Snapshots written by
/// [`StateStore::save`] only contain persisted rows.
///
/// Rows are never removed by [`StateStore::discard`]: they are kept under their key with
/// `deleted` set. The raw accessors (`get`, `search`, `all`, `len`) see discarded rows, the
/// typed ones (`get_as`, `search_as`, `all_as`) do not.
///
/// Writes made after [`StateStore::savepoint`] can be undone with
/// [`StateStore::rollback_savepoint`]. Savepoints nest.
///
/// The store is owned by the coordinating task of a run and is never shared across tasks.
pub struct StateStore {
    tables: BTreeMap<StateTable, TableState>,
    journal: Vec<Undo>,
    savepoints: Vec<usize>,
}

impl StateStore {
    /// Creates an empty store without validators or caches.
    pub fn new() -> Self {
        let tables = StateTable::ALL
            .into_iter()
            .map(|table| (table, TableState::default()))
            .collect();

        Self {
            tables,
            journal: Vec::new(),
            savepoints: Vec::new(),
        }
    }

    /// Creates an empty store with the default validators, caching every table when `cache`
    /// is set.
    pub fn with_defaults(cache: bool) -> Self {
        let mut store = Self::new();
        for (table, validator) in validators::defaults() {
            store.add_validator(table, validator);
        }
        if cache {
            for table in StateTable::ALL {
                store.enable_cache(table);
            }
        }

        store
    }

    /// Routes writes of `table` through a cache.
    pub fn enable_cache(&mut self, table: StateTable) {
        self.table_mut(table).cache_enabled = true;
    }

    /// Attaches a validator to `table`.
    pub fn add_validator(&mut self, table: StateTable, validator: Validator) {
        self.table_mut(table).validators.push(validator);
    }

    /// Returns the row with primary key `key`.
    pub fn get(&self, table: StateTable, key: &str) -> Option<&Row> {
        self.table(table).view().rows.get(key)
    }

    /// Returns whether a row with primary key `key` exists, discarded or not.
    pub fn contains(&self, table: StateTable, key: &str) -> bool {
        self.get(table, key).is_some()
    }

    /// Returns whether a row with primary key `key` exists and was not discarded.
    pub fn is_live(&self, table: StateTable, key: &str) -> bool {
        self.get(table, key).is_some_and(|row| !is_deleted(row))
    }

    /// Returns the rows whose `column` equals `value`, in key order.
    ///
    /// Matching keys are memoized per `(column, value)` until the table is written or the cache
    /// is flushed.
    pub fn search(
        &mut self,
        table: StateTable,
        column: &str,
        value: &Value,
    ) -> std::vec::IntoIter<Row> {
        let state = self.table_mut(table);
        let search_key = (column.to_string(), value.to_string());

        if !state.search_cache.contains_key(&search_key) {
            let keys = state
                .view()
                .rows
                .iter()
                .filter(|(_, row)| row.get(column).unwrap_or(&Value::Null) == value)
                .map(|(key, _)| key.clone())
                .collect();
            state.search_cache.insert(search_key.clone(), keys);
        }

        let view = state.view();
        state
            .search_cache
            .get(&search_key)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| view.rows.get(key).cloned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .into_iter()
    }

    /// Returns every row of `table`, in key order.
    pub fn all(&self, table: StateTable) -> impl Iterator<Item = &Row> + '_ {
        self.table(table).view().rows.values()
    }

    /// Returns the number of rows in `table`.
    pub fn len(&self, table: StateTable) -> usize {
        self.table(table).view().rows.len()
    }

    /// Returns whether `table` holds no row.
    pub fn is_empty(&self, table: StateTable) -> bool {
        self.len(table) == 0
    }

    /// Inserts a new row, replacing a discarded row with the same key.
    ///
    /// Fails with [`ErrorKind::DuplicateKey`] when the key or a unique column is taken and with
    /// [`ErrorKind::ValidationError`] when a validator rejects the row.
    pub fn add(&mut self, table: StateTable, row: Row) -> EtlResult<()> {
        let key = row_key(table, &row)?;
        let state = self.table(table);
        if state.view().rows.get(&key).is_some_and(|row| !is_deleted(row)) {
            bail!(
                ErrorKind::DuplicateKey,
                "State key already present",
                format!("{table}/{key}")
            );
        }
        state.view().check_unique(table, &key, &row)?;
        state.validate(&row)?;

        debug!(%table, %key, "adding state row");
        self.write(table, key, Some(row));

        Ok(())
    }

    /// Merges `partial` into the existing row with primary key `key`.
    ///
    /// Fails with [`ErrorKind::MissingKey`] when the row does not exist or was discarded.
    pub fn update(&mut self, table: StateTable, key: &str, partial: Row) -> EtlResult<()> {
        let state = self.table(table);
        let Some(existing) = state.view().rows.get(key).filter(|row| !is_deleted(row)) else {
            bail!(
                ErrorKind::MissingKey,
                "State key not found",
                format!("{table}/{key}")
            );
        };

        let mut merged = existing.clone();
        merged.extend(partial);
        if row_key(table, &merged)? != key {
            bail!(
                ErrorKind::InvalidData,
                "State update changes the primary key",
                format!("{table}/{key}")
            );
        }
        state.view().check_unique(table, key, &merged)?;
        state.validate(&merged)?;

        self.write(table, key.to_string(), Some(merged));

        Ok(())
    }

    /// Adds `row`, or merges it into the live row with the same key.
    pub fn upsert(&mut self, table: StateTable, row: Row) -> EtlResult<()> {
        let key = row_key(table, &row)?;
        if self.is_live(table, &key) {
            self.update(table, &key, row)
        } else {
            self.add(table, row)
        }
    }

    /// Removes the row with primary key `key`.
    ///
    /// Fails with [`ErrorKind::MissingKey`] when the row does not exist.
    pub fn delete(&mut self, table: StateTable, key: &str) -> EtlResult<Row> {
        if !self.contains(table, key) {
            bail!(
                ErrorKind::MissingKey,
                "State key not found",
                format!("{table}/{key}")
            );
        }

        self.write(table, key.to_string(), None)
            .ok_or_else(|| etl_error!(ErrorKind::MissingKey, "State key not found", key))
    }

    /// Marks the live row with primary key `key` as deleted, keeping it in the table. Returns
    /// whether a live row was found.
    pub fn discard(&mut self, table: StateTable, key: &str) -> bool {
        let Some(mut row) = self.get(table, key).filter(|row| !is_deleted(row)).cloned() else {
            return false;
        };
        row.insert(DELETED_COLUMN.to_string(), Value::Bool(true));

        debug!(%table, %key, "discarding state row");
        self.write(table, key.to_string(), Some(row));

        true
    }

    /// Removes every row of `table`.
    pub fn clear(&mut self, table: StateTable) {
        let data = self.table_mut(table).view_mut();
        let rows = std::mem::take(&mut data.rows);
        data.unique.clear();

        if !self.savepoints.is_empty() {
            self.journal.extend(rows.into_iter().map(|(key, row)| Undo {
                table,
                key,
                previous: Some(row),
            }));
        }
    }

    /// Opens a savepoint. Writes made from now on can be undone until it is released.
    pub fn savepoint(&mut self) {
        self.savepoints.push(self.journal.len());
    }

    /// Keeps the writes made since the last savepoint.
    pub fn release_savepoint(&mut self) {
        self.savepoints.pop();
        if self.savepoints.is_empty() {
            self.journal.clear();
        }
    }

    /// Undoes the writes made since the last savepoint and closes it.
    pub fn rollback_savepoint(&mut self) {
        let Some(mark) = self.savepoints.pop() else {
            return;
        };

        let undone = self.journal.len().saturating_sub(mark);
        for undo in self.journal.split_off(mark).into_iter().rev() {
            let data = self.table_mut(undo.table).view_mut();
            match undo.previous {
                Some(row) => {
                    data.insert(undo.table, undo.key, row);
                }
                None => {
                    data.remove(undo.table, &undo.key);
                }
            }
        }
        debug!(undone, "rolled back state savepoint");
    }

    /// Stores or removes the row under `key`, journaling the previous row while a savepoint is
    /// open.
    fn write(&mut self, table: StateTable, key: String, row: Option<Row>) -> Option<Row> {
        let data = self.table_mut(table).view_mut();
        let previous = match row {
            Some(row) => data.insert(table, key.clone(), row),
            None => data.remove(table, &key),
        };

        if !self.savepoints.is_empty() {
            self.journal.push(Undo {
                table,
                key,
                previous: previous.clone(),
            });
        }

        previous
    }

    /// Writes every cache back to its persisted table and drops the search caches.
    pub fn flush_cache(&mut self) {
        for (table, state) in self.tables.iter_mut() {
            state.search_cache.clear();
            if let Some(cache) = state.cache.take() {
                debug!(%table, rows = cache.rows.len(), "flushing state cache");
                state.persisted = cache;
            }
        }
    }

    /// Writes a snapshot of the persisted tables to `path`.
    ///
    /// The snapshot is written next to `path` first and renamed into place; the previous
    /// snapshot is kept as `<path>.backup` until the rename succeeded.
    pub async fn save(&self, path: &Path) -> EtlResult<()> {
        let tables = self
            .tables
            .iter()
            .map(|(table, state)| (*table, &state.persisted.rows))
            .collect::<Vec<_>>();
        snapshot::write(path, &tables).await?;

        info!(path = %path.display(), "state saved");

        Ok(())
    }

    /// Replaces the content of the store with the snapshot at `path`.
    ///
    /// Falls back to the backup snapshot when `path` is missing and starts empty when neither
    /// exists. Validators and cache settings are kept.
    pub async fn load(&mut self, path: &Path) -> EtlResult<()> {
        let snapshot = snapshot::read(path).await?;

        for state in self.tables.values_mut() {
            state.persisted.clear();
            state.cache = None;
            state.search_cache.clear();
        }

        let Some(snapshot) = snapshot else {
            info!(path = %path.display(), "no state snapshot found, starting empty");
            return Ok(());
        };

        for (table, rows) in snapshot {
            let data = &mut self.table_mut(table).persisted;
            for (key, row) in rows {
                data.insert(table, key, row);
            }
        }

        info!(path = %path.display(), "state loaded");

        Ok(())
    }

    /// Returns the typed row with primary key `key`, unless it was discarded.
    pub fn get_as<T: StateRow>(&self, key: &str) -> EtlResult<Option<T>> {
        self.get(T::TABLE, key)
            .filter(|row| !is_deleted(row))
            .map(T::from_row)
            .transpose()
    }

    /// Returns the live typed rows whose `column` equals `value`, in key order.
    pub fn search_as<T: StateRow>(&mut self, column: &str, value: &Value) -> EtlResult<Vec<T>> {
        self.search(T::TABLE, column, value)
            .filter(|row| !is_deleted(row))
            .map(|row| T::from_row(&row))
            .collect()
    }

    /// Inserts a typed row.
    pub fn add_as<T: StateRow>(&mut self, row: &T) -> EtlResult<()> {
        self.add(T::TABLE, row.to_row()?)
    }

    /// Replaces the typed row sharing the key of `row`.
    pub fn put_as<T: StateRow>(&mut self, row: &T) -> EtlResult<()> {
        self.upsert(T::TABLE, row.to_row()?)
    }

    /// Returns every live typed row of the table.
    pub fn all_as<T: StateRow>(&self) -> EtlResult<Vec<T>> {
        self.all(T::TABLE)
            .filter(|row| !is_deleted(row))
            .map(T::from_row)
            .collect()
    }

    fn table(&self, table: StateTable) -> &TableState {
        // Every table is created in `new`.
        &self.tables[&table]
    }

    fn table_mut(&mut self, table: StateTable) -> &mut TableState {
        self.tables.entry(table).or_default()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (table, state) in &self.tables {
            map.entry(&table.name(), &state.view().rows.len());
        }
        map.finish()
    }
}

fn row_key(table: StateTable, row: &Row) -> EtlResult<String> {
    row.get(table.key_column())
        .and_then(scalar_key)
        .ok_or_else(|| {
            etl_error!(
                ErrorKind::InvalidData,
                "State row has no primary key",
                format!("{table}.{}", table.key_column())
            )
        })
}
