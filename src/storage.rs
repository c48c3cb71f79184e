//! Generic row primitives shared by every channel.
//!
//! Table and column names only ever come from [`Table`] and `&'static str`
//! literals inside this crate; all values are bound parameters.

use crate::errors::Result;
use crate::schema::{Record, Table};
use sqlx::{PgExecutor, Postgres, QueryBuilder};

/// A value bound into a query.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Value<'a> {
    Bytes(&'a [u8]),
    Text(&'a str),
    Int(i64),
}

/// A condition on a single column. Multiple predicates are combined with `AND`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Predicate<'a> {
    Eq(&'static str, Value<'a>),
    Gt(&'static str, Value<'a>),
    Le(&'static str, Value<'a>),
}

/// Row ordering for range reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Order {
    IdAsc,
    IdDesc,
    /// Due time first, insertion order for ties.
    DueAsc,
}

impl Order {
    fn sql(self) -> &'static str {
        match self {
            Order::IdAsc => "id ASC",
            Order::IdDesc => "id DESC",
            Order::DueAsc => "ts ASC, id ASC",
        }
    }
}

fn push_value<'a>(query: &mut QueryBuilder<'a, Postgres>, value: Value<'a>) {
    match value {
        Value::Bytes(bytes) => query.push_bind(bytes),
        Value::Text(text) => query.push_bind(text),
        Value::Int(int) => query.push_bind(int),
    };
}

fn push_filter<'a>(query: &mut QueryBuilder<'a, Postgres>, predicates: &[Predicate<'a>]) {
    for (i, predicate) in predicates.iter().enumerate() {
        query.push(if i == 0 { " WHERE " } else { " AND " });
        let (column, operator, value) = match *predicate {
            Predicate::Eq(column, value) => (column, " = ", value),
            Predicate::Gt(column, value) => (column, " > ", value),
            Predicate::Le(column, value) => (column, " <= ", value),
        };
        query.push(column).push(operator);
        push_value(query, value);
    }
}

fn push_order_and_limit(
    query: &mut QueryBuilder<'_, Postgres>,
    order: Order,
    limit: Option<i64>,
) {
    query.push(" ORDER BY ").push(order.sql());
    if let Some(limit) = limit {
        query.push(" LIMIT ").push_bind(limit);
    }
}

fn insert_query<'a>(
    table: Table,
    columns: &[&'static str],
    rows: &[&[Value<'a>]],
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) VALUES ",
        table.name(),
        columns.join(", ")
    ));
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            query.push(", ");
        }
        query.push("(");
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                query.push(", ");
            }
            push_value(&mut query, *value);
        }
        query.push(")");
    }
    query.push(" RETURNING id");
    query
}

fn select_query<'a>(
    table: Table,
    predicates: &[Predicate<'a>],
    order: Order,
    limit: Option<i64>,
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::new(format!(
        "SELECT {} FROM {}",
        table.columns(),
        table.name()
    ));
    push_filter(&mut query, predicates);
    push_order_and_limit(&mut query, order, limit);
    query
}

/// Deletes the selected rows and hands them back in one statement.
///
/// Rows locked by a concurrent taker are skipped, so no row is ever returned
/// twice. `RETURNING` is unordered, hence the outer `SELECT`.
fn take_query<'a>(
    table: Table,
    predicates: &[Predicate<'a>],
    order: Order,
    limit: Option<i64>,
) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::new(format!(
        "WITH taken AS (DELETE FROM {name} WHERE id IN (SELECT id FROM {name}",
        name = table.name()
    ));
    push_filter(&mut query, predicates);
    push_order_and_limit(&mut query, order, limit);
    query.push(format!(
        " FOR UPDATE SKIP LOCKED) RETURNING {columns}) SELECT {columns} FROM taken ORDER BY {order}",
        columns = table.columns(),
        order = order.sql()
    ));
    query
}

fn delete_query<'a>(table: Table, predicates: &[Predicate<'a>]) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::new(format!("DELETE FROM {}", table.name()));
    push_filter(&mut query, predicates);
    query
}

fn count_query<'a>(table: Table, predicates: &[Predicate<'a>]) -> QueryBuilder<'a, Postgres> {
    let mut query = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", table.name()));
    push_filter(&mut query, predicates);
    query
}

/// Inserts a single row and returns its new id.
pub(crate) async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    table: Table,
    fields: &[(&'static str, Value<'_>)],
) -> Result<i64> {
    let columns: Vec<_> = fields.iter().map(|(column, _)| *column).collect();
    let values: Vec<_> = fields.iter().map(|(_, value)| *value).collect();

    let id = insert_query(table, &columns, &[values.as_slice()])
        .build_query_scalar::<i64>()
        .fetch_one(executor)
        .await?;

    Ok(id)
}

/// Inserts several rows in one statement and returns their ids in row order.
///
/// Callers keep `rows.len() * columns.len()` under the protocol's bind limit.
pub(crate) async fn insert_many<'e>(
    executor: impl PgExecutor<'e>,
    table: Table,
    columns: &[&'static str],
    rows: &[&[Value<'_>]],
) -> Result<Vec<i64>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids = insert_query(table, columns, rows)
        .build_query_scalar::<i64>()
        .fetch_all(executor)
        .await?;

    // Sequence values are handed out in row order within one statement.
    ids.sort_unstable();
    Ok(ids)
}

/// Reads rows matching all `predicates`, without removing them.
pub(crate) async fn fetch_range<'e, R: Record>(
    executor: impl PgExecutor<'e>,
    predicates: &[Predicate<'_>],
    order: Order,
    limit: Option<i64>,
) -> Result<Vec<R>> {
    let rows = select_query(R::TABLE, predicates, order, limit)
        .build_query_as::<R>()
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// Atomically removes and returns rows matching all `predicates`.
pub(crate) async fn take_range<'e, R: Record>(
    executor: impl PgExecutor<'e>,
    predicates: &[Predicate<'_>],
    order: Order,
    limit: Option<i64>,
) -> Result<Vec<R>> {
    let rows = take_query(R::TABLE, predicates, order, limit)
        .build_query_as::<R>()
        .fetch_all(executor)
        .await?;
    Ok(rows)
}

/// Deletes a row by id. Returns whether a row was removed; a missing id is not an error.
pub(crate) async fn delete<'e>(
    executor: impl PgExecutor<'e>,
    table: Table,
    id: i64,
) -> Result<bool> {
    let affected = delete_where(executor, table, &[Predicate::Eq("id", Value::Int(id))]).await?;
    Ok(affected > 0)
}

/// Deletes every row matching all `predicates` and returns how many were removed.
pub(crate) async fn delete_where<'e>(
    executor: impl PgExecutor<'e>,
    table: Table,
    predicates: &[Predicate<'_>],
) -> Result<u64> {
    let result = delete_query(table, predicates)
        .build()
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes every row of `table`.
pub(crate) async fn flush<'e>(executor: impl PgExecutor<'e>, table: Table) -> Result<u64> {
    delete_where(executor, table, &[]).await
}

/// Counts the rows matching all `predicates`.
pub(crate) async fn count<'e>(
    executor: impl PgExecutor<'e>,
    table: Table,
    predicates: &[Predicate<'_>],
) -> Result<i64> {
    let count = count_query(table, predicates)
        .build_query_scalar::<i64>()
        .fetch_one(executor)
        .await?;
    Ok(count)
}

/// Takes the transaction-scoped append lock of `table`, waiting for the current holder.
///
/// Writers that hold it while inserting commit in id order, so a reader never
/// sees a row while a lower id of the same table is still uncommitted. The
/// lock is released on commit or rollback; outside a transaction it is
/// released immediately.
pub(crate) async fn lock_appends<'e>(executor: impl PgExecutor<'e>, table: Table) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(append_lock_key(table))
        .execute(executor)
        .await?;
    Ok(())
}

/// Advisory lock key for appends to `table`. Shared by every process using the schema.
fn append_lock_key(table: Table) -> i64 {
    // "taskq" in the high bytes keeps the keys clear of other advisory lock users.
    const NAMESPACE: i64 = 0x7461_736b_7100;
    let offset = match table {
        Table::Queue => 1,
        Table::Schedule => 2,
        Table::Results => 3,
        Table::Events => 4,
    };
    NAMESPACE + offset
}

/// Whether `table` exists in the connection's search path.
pub(crate) async fn table_exists<'e>(executor: impl PgExecutor<'e>, table: Table) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
        .bind(table.name())
        .fetch_one(executor)
        .await?;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_binds_every_value() {
        let payload = b"task".as_slice();
        let query = insert_query(
            Table::Schedule,
            &["item", "ts"],
            &[&[Value::Bytes(payload), Value::Int(42)]],
        );
        assert_eq!(
            query.sql(),
            "INSERT INTO task_schedule (item, ts) VALUES ($1, $2) RETURNING id"
        );
    }

    #[test]
    fn insert_many_emits_one_tuple_per_row() {
        let (a, b) = (b"a".as_slice(), b"b".as_slice());
        let query = insert_query(
            Table::Queue,
            &["item"],
            &[&[Value::Bytes(a)], &[Value::Bytes(b)]],
        );
        assert_eq!(
            query.sql(),
            "INSERT INTO task_queue (item) VALUES ($1), ($2) RETURNING id"
        );
    }

    #[test]
    fn select_without_predicates() {
        let query = select_query(Table::Queue, &[], Order::IdAsc, Some(5));
        assert_eq!(
            query.sql(),
            "SELECT id, item, created FROM task_queue ORDER BY id ASC LIMIT $1"
        );
    }

    #[test]
    fn select_combines_predicates() {
        let query = select_query(
            Table::Events,
            &[
                Predicate::Eq("channel", Value::Text("updates")),
                Predicate::Gt("id", Value::Int(7)),
            ],
            Order::IdAsc,
            None,
        );
        assert_eq!(
            query.sql(),
            "SELECT id, channel, message, created FROM task_events \
             WHERE channel = $1 AND id > $2 ORDER BY id ASC"
        );
    }

    #[test]
    fn take_locks_selected_rows_and_orders_output() {
        let query = take_query(
            Table::Schedule,
            &[Predicate::Le("ts", Value::Int(100))],
            Order::DueAsc,
            None,
        );
        assert_eq!(
            query.sql(),
            "WITH taken AS (DELETE FROM task_schedule WHERE id IN \
             (SELECT id FROM task_schedule WHERE ts <= $1 ORDER BY ts ASC, id ASC \
             FOR UPDATE SKIP LOCKED) RETURNING id, item, ts, created) \
             SELECT id, item, ts, created FROM taken ORDER BY ts ASC, id ASC"
        );
    }

    #[test]
    fn take_with_limit() {
        let query = take_query(Table::Queue, &[], Order::IdAsc, Some(1));
        assert_eq!(
            query.sql(),
            "WITH taken AS (DELETE FROM task_queue WHERE id IN \
             (SELECT id FROM task_queue ORDER BY id ASC LIMIT $1 \
             FOR UPDATE SKIP LOCKED) RETURNING id, item, created) \
             SELECT id, item, created FROM taken ORDER BY id ASC"
        );
    }

    #[test]
    fn append_lock_keys_are_distinct_per_table() {
        let keys: std::collections::HashSet<_> =
            Table::ALL.iter().map(|table| append_lock_key(*table)).collect();
        assert_eq!(keys.len(), Table::ALL.len());
    }

    #[test]
    fn delete_and_count() {
        let predicates = [Predicate::Eq("key", Value::Text("k"))];
        assert_eq!(
            delete_query(Table::Results, &predicates).sql(),
            "DELETE FROM task_results WHERE key = $1"
        );
        assert_eq!(
            count_query(Table::Results, &predicates).sql(),
            "SELECT COUNT(*) FROM task_results WHERE key = $1"
        );
        assert_eq!(
            delete_query(Table::Queue, &[]).sql(),
            "DELETE FROM task_queue"
        );
    }
}
