//! SQLite implementation of the storage backend.
//!
//! # Responsibility
//! - Compile read requests into SQL and decode rows into [`Value`]s.
//! - Apply write batches inside `BEGIN IMMEDIATE` transactions.
//!
//! # Invariants
//! - One connection guarded by a mutex; a transaction holds the lock until
//!   it commits, rolls back or is dropped.
//! - Identifiers are taken from the static schema description, never from
//!   caller strings.
//! - Unsorted results follow insertion order (`rowid`).

use crate::db::{ensure_connection_ready, open_db, open_db_in_memory};
use crate::error::{StoreError, StoreResult};
use crate::model::relation::{Cardinality, Link, Relation};
use crate::model::value::{EntityKind, Value};
use crate::query::expr::{CompareOp, Field, Measure, Predicate, SortKey};
use crate::store::{
    AggregateFunction, Backend, BackendTransaction, QueryPlan, ReadRequest, RelatedRead, Row,
    Selection, WriteBatch, WriteOp,
};
use log::warn;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Backend over one migrated SQLite connection.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Wraps a connection that was bootstrapped by `db::open_db*`.
    ///
    /// # Errors
    /// - Returns `Db` when the schema is missing or outdated.
    pub fn new(conn: Connection) -> StoreResult<Self> {
        ensure_connection_ready(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::new(open_db(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::new(open_db_in_memory()?)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Backend for SqliteBackend {
    fn execute_read(&self, request: &ReadRequest) -> StoreResult<Vec<Row>> {
        let conn = self.lock()?;
        run_read(&conn, request)
    }

    fn begin_transaction(&self) -> StoreResult<Box<dyn BackendTransaction + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }
}

struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl BackendTransaction for SqliteTransaction<'_> {
    fn execute_read(&mut self, request: &ReadRequest) -> StoreResult<Vec<Row>> {
        run_read(&self.conn, request)
    }

    fn execute_write(&mut self, batch: &WriteBatch) -> StoreResult<usize> {
        let mut affected = 0;
        for op in &batch.ops {
            affected += run_write(&self.conn, op)?;
        }
        Ok(affected)
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.conn.execute_batch("COMMIT;")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
            warn!("event=tx_rollback module=store status=error error={err}");
        }
    }
}

fn run_read(conn: &Connection, request: &ReadRequest) -> StoreResult<Vec<Row>> {
    let mut builder = SqlBuilder::default();
    let sql = match request {
        ReadRequest::Query(plan) => builder.query(plan)?,
        ReadRequest::Related(read) => {
            if read.source_ids.is_empty() {
                return Ok(Vec::new());
            }
            builder.related(read)
        }
    };
    query_rows(conn, &sql, builder.binds)
}

fn query_rows(conn: &Connection, sql: &str, binds: Vec<SqlValue>) -> StoreResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let width = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut decoded = Vec::new();

    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(decode_value(row.get_ref(index)?)?);
        }
        decoded.push(values);
    }

    Ok(decoded)
}

fn decode_value(value: ValueRef<'_>) -> StoreResult<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|err| StoreError::InvalidData(format!("non UTF-8 text: {err}")))?
                .to_string(),
        ),
        ValueRef::Blob(_) => {
            return Err(StoreError::InvalidData(
                "unexpected blob column".to_string(),
            ))
        }
    })
}

fn encode_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Id(value) => SqlValue::Text(value.to_string()),
    }
}

fn run_write(conn: &Connection, op: &WriteOp) -> StoreResult<usize> {
    match op {
        WriteOp::Insert { kind, row } => {
            let columns = kind.columns();
            if row.len() != columns.len() {
                return Err(StoreError::UnsupportedRequest(format!(
                    "{} insert has {} values, expected {}",
                    kind.table(),
                    row.len(),
                    columns.len()
                )));
            }
            let placeholders = (1..=columns.len())
                .map(|index| format!("?{index}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({placeholders});",
                kind.table(),
                columns.join(", ")
            );
            Ok(conn.execute(&sql, params_from_iter(row.iter().map(encode_value)))?)
        }
        WriteOp::Update { kind, id, changes } => {
            if changes.is_empty() {
                return Ok(0);
            }
            let mut assignments = Vec::with_capacity(changes.len());
            let mut binds = Vec::with_capacity(changes.len() + 1);
            for (column, value) in changes {
                let column = static_column(*kind, column)?;
                if column == "id" {
                    return Err(StoreError::UnsupportedRequest(format!(
                        "{} id cannot be updated",
                        kind.table()
                    )));
                }
                binds.push(encode_value(value));
                assignments.push(format!("{column} = ?{}", binds.len()));
            }
            binds.push(SqlValue::Text(id.to_string()));
            let sql = format!(
                "UPDATE {} SET {} WHERE id = ?{};",
                kind.table(),
                assignments.join(", "),
                binds.len()
            );
            let changed = conn.execute(&sql, params_from_iter(binds))?;
            if changed == 0 {
                return Err(StoreError::RowMissing {
                    kind: *kind,
                    id: *id,
                });
            }
            Ok(changed)
        }
        WriteOp::Delete { kind, id } => {
            let sql = format!("DELETE FROM {} WHERE id = ?1;", kind.table());
            let changed = conn.execute(&sql, [id.to_string()])?;
            if changed == 0 {
                return Err(StoreError::RowMissing {
                    kind: *kind,
                    id: *id,
                });
            }
            Ok(changed)
        }
        WriteOp::Link {
            relation,
            source,
            target,
        } => {
            let (table, source_column, target_column) = association(*relation)?;
            let sql = format!(
                "INSERT OR IGNORE INTO {table} ({source_column}, {target_column}) VALUES (?1, ?2);"
            );
            Ok(conn.execute(&sql, [source.to_string(), target.to_string()])?)
        }
        WriteOp::Unlink {
            relation,
            source,
            target,
        } => {
            let (table, source_column, target_column) = association(*relation)?;
            let sql = format!(
                "DELETE FROM {table} WHERE {source_column} = ?1 AND {target_column} = ?2;"
            );
            Ok(conn.execute(&sql, [source.to_string(), target.to_string()])?)
        }
        WriteOp::UnlinkAll { relation, source } => {
            let (table, source_column, _) = association(*relation)?;
            let sql = format!("DELETE FROM {table} WHERE {source_column} = ?1;");
            Ok(conn.execute(&sql, [source.to_string()])?)
        }
    }
}

fn association(relation: Relation) -> StoreResult<(&'static str, &'static str, &'static str)> {
    match relation.link() {
        Link::Association {
            table,
            source_column,
            target_column,
        } => Ok((table, source_column, target_column)),
        _ => Err(StoreError::UnsupportedRequest(format!(
            "relation {relation} has no association table"
        ))),
    }
}

fn static_column(kind: EntityKind, column: &str) -> StoreResult<&'static str> {
    kind.column_index(column)
        .map(|index| kind.columns()[index])
        .ok_or_else(|| {
            StoreError::UnsupportedRequest(format!("{} has no column `{column}`", kind.table()))
        })
}

/// SQL text plus numbered bind values (`?1`, `?2`, ...).
///
/// Numbered placeholders keep binds valid regardless of the order in which
/// fragments are assembled.
#[derive(Default)]
struct SqlBuilder {
    binds: Vec<SqlValue>,
    aliases: usize,
}

impl SqlBuilder {
    fn bind(&mut self, value: SqlValue) -> String {
        self.binds.push(value);
        format!("?{}", self.binds.len())
    }

    fn alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        format!("{prefix}{}", self.aliases)
    }

    fn query(&mut self, plan: &QueryPlan) -> StoreResult<String> {
        let root = plan.root;
        let source = self.root_source(plan)?;

        Ok(match &plan.selection {
            Selection::Entities { joins } => {
                let mut columns = prefixed_columns("t0", root);
                let mut join_sql = String::new();
                let mut join_order = String::new();

                for (position, relation) in joins.iter().enumerate() {
                    check_source(*relation, root)?;
                    let target = relation.target();
                    let joined = format!("j{}", position + 1);
                    match relation.link() {
                        Link::TargetColumn(foreign_key) => {
                            join_sql.push_str(&format!(
                                " LEFT JOIN {} {joined} ON {joined}.{foreign_key} = t0.id",
                                target.table()
                            ));
                            join_order.push_str(&format!(", {joined}.rowid ASC"));
                        }
                        Link::SourceColumn(foreign_key) => {
                            join_sql.push_str(&format!(
                                " LEFT JOIN {} {joined} ON {joined}.id = t0.{foreign_key}",
                                target.table()
                            ));
                        }
                        Link::Association {
                            table,
                            source_column,
                            target_column,
                        } => {
                            let link = format!("a{}", position + 1);
                            join_sql.push_str(&format!(
                                " LEFT JOIN {table} {link} ON {link}.{source_column} = t0.id \
                                 LEFT JOIN {} {joined} ON {joined}.id = {link}.{target_column}",
                                target.table()
                            ));
                            join_order.push_str(&format!(", {link}.rowid ASC"));
                        }
                    }
                    columns.push_str(", ");
                    columns.push_str(&prefixed_columns(&joined, target));
                }

                let order = self.order_clause("t0", root, &plan.order, "t0.row_order")?;
                format!("SELECT {columns} FROM {source}{join_sql} ORDER BY {order}{join_order};")
            }
            Selection::Count => format!("SELECT COUNT(*) FROM {source};"),
            Selection::Exists => format!("SELECT EXISTS (SELECT 1 FROM {source} LIMIT 1);"),
            Selection::Aggregate { function, measure } => {
                let expression = self.measure("t0", root, measure)?;
                let function = match function {
                    AggregateFunction::Max => "MAX",
                    AggregateFunction::Min => "MIN",
                    AggregateFunction::Sum => "SUM",
                    AggregateFunction::Average => "AVG",
                };
                format!("SELECT {function}({expression}) FROM {source};")
            }
            Selection::Project { measures, distinct } => {
                if measures.is_empty() {
                    return Err(StoreError::UnsupportedRequest(
                        "projection without measures".to_string(),
                    ));
                }
                let expressions = measures
                    .iter()
                    .map(|measure| self.measure("t0", root, measure))
                    .collect::<StoreResult<Vec<_>>>()?
                    .join(", ");
                if *distinct {
                    let order = if plan.order.is_empty() {
                        (1..=measures.len())
                            .map(|position| position.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    } else {
                        self.sort_terms("t0", root, &plan.order)?.join(", ")
                    };
                    format!("SELECT DISTINCT {expressions} FROM {source} ORDER BY {order};")
                } else {
                    let order = self.order_clause("t0", root, &plan.order, "t0.row_order")?;
                    format!("SELECT {expressions} FROM {source} ORDER BY {order};")
                }
            }
            Selection::Group {
                key,
                sum,
                having_count_greater_than,
            } => {
                let key_expression = self.measure("t0", root, key)?;
                let sum_expression = match sum {
                    Some(measure) => format!(", SUM({})", self.measure("t0", root, measure)?),
                    None => String::new(),
                };
                let having = match having_count_greater_than {
                    Some(threshold) => format!(
                        " HAVING COUNT(*) > {}",
                        self.bind(SqlValue::Integer(to_sql_integer(*threshold)?))
                    ),
                    None => String::new(),
                };
                format!(
                    "SELECT {key_expression} AS group_key, COUNT(*){sum_expression} \
                     FROM {source} GROUP BY group_key{having} ORDER BY group_key ASC;"
                )
            }
        })
    }

    /// Filtered (and paginated) root rows as subquery `t0`, exposing the
    /// entity columns plus `row_order`.
    fn root_source(&mut self, plan: &QueryPlan) -> StoreResult<String> {
        let root = plan.root;
        let mut sql = format!(
            "SELECT t0.rowid AS row_order, {} FROM {} t0",
            prefixed_columns("t0", root),
            root.table()
        );

        if !plan.filters.is_empty() {
            let conditions = plan
                .filters
                .iter()
                .map(|filter| self.predicate("t0", root, filter).map(|sql| format!("({sql})")))
                .collect::<StoreResult<Vec<_>>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if plan.skip.is_some() || plan.take.is_some() {
            let order = self.order_clause("t0", root, &plan.order, "t0.rowid")?;
            sql.push_str(&format!(" ORDER BY {order}"));
            match (plan.take, plan.skip) {
                (Some(take), skip) => {
                    sql.push_str(&format!(
                        " LIMIT {}",
                        self.bind(SqlValue::Integer(to_sql_integer(take)?))
                    ));
                    if let Some(skip) = skip.filter(|skip| *skip > 0) {
                        sql.push_str(&format!(
                            " OFFSET {}",
                            self.bind(SqlValue::Integer(to_sql_integer(skip)?))
                        ));
                    }
                }
                (None, Some(skip)) => {
                    sql.push_str(&format!(
                        " LIMIT -1 OFFSET {}",
                        self.bind(SqlValue::Integer(to_sql_integer(skip)?))
                    ));
                }
                (None, None) => {}
            }
        }

        Ok(format!("({sql}) t0"))
    }

    fn related(&mut self, read: &RelatedRead) -> String {
        let relation = read.relation;
        let target = relation.target();
        let placeholders = read
            .source_ids
            .iter()
            .map(|id| self.bind(SqlValue::Text(id.to_string())))
            .collect::<Vec<_>>()
            .join(", ");
        let columns = prefixed_columns("x", target);

        match relation.link() {
            Link::TargetColumn(foreign_key) => format!(
                "SELECT x.{foreign_key}, {columns} FROM {} x \
                 WHERE x.{foreign_key} IN ({placeholders}) ORDER BY x.rowid ASC;",
                target.table()
            ),
            Link::SourceColumn(foreign_key) => format!(
                "SELECT s.id, {columns} FROM {} s JOIN {} x ON x.id = s.{foreign_key} \
                 WHERE s.id IN ({placeholders}) ORDER BY s.rowid ASC;",
                relation.source().table(),
                target.table()
            ),
            Link::Association {
                table,
                source_column,
                target_column,
            } => format!(
                "SELECT a.{source_column}, {columns} FROM {table} a \
                 JOIN {} x ON x.id = a.{target_column} \
                 WHERE a.{source_column} IN ({placeholders}) ORDER BY a.rowid ASC;",
                target.table()
            ),
        }
    }

    fn order_clause(
        &mut self,
        alias: &str,
        kind: EntityKind,
        order: &[SortKey],
        tiebreak: &str,
    ) -> StoreResult<String> {
        let mut terms = self.sort_terms(alias, kind, order)?;
        terms.push(format!("{tiebreak} ASC"));
        Ok(terms.join(", "))
    }

    fn sort_terms(
        &mut self,
        alias: &str,
        kind: EntityKind,
        order: &[SortKey],
    ) -> StoreResult<Vec<String>> {
        order
            .iter()
            .map(|key| {
                let expression = self.field(alias, kind, &key.field)?;
                let direction = if key.descending { "DESC" } else { "ASC" };
                Ok(format!("{expression} {direction}"))
            })
            .collect()
    }

    fn field(&mut self, alias: &str, kind: EntityKind, field: &Field) -> StoreResult<String> {
        match field.relation() {
            None => Ok(format!("{alias}.{}", static_column(kind, field.column())?)),
            Some(relation) => {
                check_source(relation, kind)?;
                if relation.cardinality() != Cardinality::One {
                    return Err(StoreError::UnsupportedRequest(format!(
                        "field through collection {relation}"
                    )));
                }
                let column = static_column(relation.target(), field.column())?;
                let (from, related) = self.related_from(relation, alias);
                Ok(format!("(SELECT {related}.{column} {from})"))
            }
        }
    }

    fn measure(&mut self, alias: &str, kind: EntityKind, measure: &Measure) -> StoreResult<String> {
        match measure {
            Measure::Field(field) => self.field(alias, kind, field),
            Measure::Count(relation) => {
                check_collection(*relation, kind)?;
                let (from, _) = self.related_from(*relation, alias);
                Ok(format!("(SELECT COUNT(*) {from})"))
            }
        }
    }

    /// `FROM ... WHERE ...` reaching the targets of `relation` from the row
    /// `alias`, and the alias of the target table.
    fn related_from(&mut self, relation: Relation, alias: &str) -> (String, String) {
        let target = relation.target().table();
        let related = self.alias("x");
        let from = match relation.link() {
            Link::TargetColumn(foreign_key) => {
                format!("FROM {target} {related} WHERE {related}.{foreign_key} = {alias}.id")
            }
            Link::SourceColumn(foreign_key) => {
                format!("FROM {target} {related} WHERE {related}.id = {alias}.{foreign_key}")
            }
            Link::Association {
                table,
                source_column,
                target_column,
            } => {
                let link = self.alias("a");
                format!(
                    "FROM {table} {link} JOIN {target} {related} ON {related}.id = {link}.{target_column} \
                     WHERE {link}.{source_column} = {alias}.id"
                )
            }
        };
        (from, related)
    }

    fn predicate(
        &mut self,
        alias: &str,
        kind: EntityKind,
        predicate: &Predicate,
    ) -> StoreResult<String> {
        Ok(match predicate {
            Predicate::Compare { field, op, value } => {
                let expression = self.field(alias, kind, field)?;
                if value.is_null() {
                    match op {
                        CompareOp::Eq => format!("{expression} IS NULL"),
                        CompareOp::Ne => format!("{expression} IS NOT NULL"),
                        _ => "0".to_string(),
                    }
                } else {
                    let bound = self.bind(encode_value(value));
                    format!("{expression} {} {bound}", op.symbol())
                }
            }
            Predicate::Contains { field, needle } => {
                let expression = self.field(alias, kind, field)?;
                let bound = self.bind(SqlValue::Text(needle.clone()));
                format!("instr({expression}, {bound}) > 0")
            }
            Predicate::StartsWith { field, prefix } => {
                let expression = self.field(alias, kind, field)?;
                let bound = self.bind(SqlValue::Text(prefix.clone()));
                format!("instr({expression}, {bound}) = 1")
            }
            Predicate::In { field, values } => {
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                let expression = self.field(alias, kind, field)?;
                let bound = values
                    .iter()
                    .map(|value| self.bind(encode_value(value)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{expression} IN ({bound})")
            }
            Predicate::IsNull(field) => format!("{} IS NULL", self.field(alias, kind, field)?),
            Predicate::Any {
                relation,
                predicate,
            } => {
                check_collection(*relation, kind)?;
                let (from, related) = self.related_from(*relation, alias);
                let condition = match predicate {
                    Some(inner) => format!(
                        " AND ({})",
                        self.predicate(&related, relation.target(), inner)?
                    ),
                    None => String::new(),
                };
                format!("EXISTS (SELECT 1 {from}{condition})")
            }
            Predicate::And(terms) => self.combine(alias, kind, terms, " AND ", "1")?,
            Predicate::Or(terms) => self.combine(alias, kind, terms, " OR ", "0")?,
            Predicate::Not(inner) => format!("NOT ({})", self.predicate(alias, kind, inner)?),
        })
    }

    fn combine(
        &mut self,
        alias: &str,
        kind: EntityKind,
        terms: &[Predicate],
        separator: &str,
        empty: &str,
    ) -> StoreResult<String> {
        if terms.is_empty() {
            return Ok(empty.to_string());
        }
        let parts = terms
            .iter()
            .map(|term| self.predicate(alias, kind, term).map(|sql| format!("({sql})")))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(parts.join(separator))
    }
}

fn prefixed_columns(alias: &str, kind: EntityKind) -> String {
    kind.columns()
        .iter()
        .map(|column| format!("{alias}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_source(relation: Relation, kind: EntityKind) -> StoreResult<()> {
    if relation.source() != kind {
        return Err(StoreError::UnsupportedRequest(format!(
            "relation {relation} does not start at {kind}"
        )));
    }
    Ok(())
}

fn check_collection(relation: Relation, kind: EntityKind) -> StoreResult<()> {
    check_source(relation, kind)?;
    if relation.cardinality() != Cardinality::Many {
        return Err(StoreError::UnsupportedRequest(format!(
            "relation {relation} is not a collection"
        )));
    }
    Ok(())
}

fn to_sql_integer(value: u64) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::UnsupportedRequest(format!("value {value} out of range")))
}

#[cfg(test)]
mod tests {
    use super::SqliteBackend;
    use crate::model::relation::Relation;
    use crate::model::value::{EntityKind, Value};
    use crate::query::expr::{Field, Predicate};
    use crate::store::{Backend, QueryPlan, ReadRequest, Selection, WriteBatch, WriteOp};
    use uuid::Uuid;

    fn insert_author(backend: &SqliteBackend, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut tx = backend.begin_transaction().unwrap();
        tx.execute_write(&WriteBatch {
            ops: vec![WriteOp::Insert {
                kind: EntityKind::Author,
                row: vec![Value::Id(id), Value::from(name)],
            }],
        })
        .unwrap();
        tx.commit().unwrap();
        id
    }

    fn plan(selection: Selection) -> QueryPlan {
        QueryPlan {
            root: EntityKind::Author,
            filters: Vec::new(),
            order: Vec::new(),
            skip: None,
            take: None,
            selection,
        }
    }

    #[test]
    fn unsorted_rows_follow_insertion_order() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let bob = insert_author(&backend, "Bob");
        let alice = insert_author(&backend, "Alice");

        let rows = backend
            .execute_read(&ReadRequest::Query(plan(Selection::Entities {
                joins: Vec::new(),
            })))
            .unwrap();
        let ids = rows.iter().map(|row| row[0].as_id().unwrap()).collect::<Vec<_>>();
        assert_eq!(ids, vec![bob, alice]);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        {
            let mut tx = backend.begin_transaction().unwrap();
            tx.execute_write(&WriteBatch {
                ops: vec![WriteOp::Insert {
                    kind: EntityKind::Author,
                    row: vec![Value::Id(Uuid::new_v4()), Value::from("Ghost")],
                }],
            })
            .unwrap();
        }
        let rows = backend
            .execute_read(&ReadRequest::Query(plan(Selection::Count)))
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(0)]]);
    }

    #[test]
    fn any_predicate_compiles_against_collections() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        insert_author(&backend, "Alice");
        let mut query = plan(Selection::Count);
        query.filters.push(Predicate::any(Relation::AuthorArticles));
        let rows = backend.execute_read(&ReadRequest::Query(query)).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(0)]]);

        let mut query = plan(Selection::Count);
        query.filters.push(Field::new("name").starts_with("Al"));
        let rows = backend.execute_read(&ReadRequest::Query(query)).unwrap();
        assert_eq!(rows, vec![vec![Value::Integer(1)]]);
    }

    #[test]
    fn unknown_columns_are_rejected_by_the_backend() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let mut query = plan(Selection::Count);
        query.filters.push(Field::new("name; DROP TABLE authors").equals("x"));
        assert!(backend.execute_read(&ReadRequest::Query(query)).is_err());
    }
}
