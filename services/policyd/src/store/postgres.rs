//! Postgres-backed implementation of the policy store.
//!
//! # What this module is
//! Implements [`PolicyStore`] over the `casbin_rule` table using `sqlx`. One
//! row per rule, `v0..v5` nullable; absent trailing fields are `NULL`, and a
//! `NULL` before a set column reads back as the empty string.
//!
//! # Key invariants
//! - Each trait call runs inside exactly one transaction.
//! - Rows are loaded ascending by `id`, so repeated loads are deterministic.
//! - The unique constraint is `NULLS NOT DISTINCT`, so short rules cannot be
//!   duplicated either; unique violations surface as [`StoreError::Conflict`].
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - Dynamic SQL only ever names columns from the fixed [`COLUMNS`] allowlist;
//!   every value is a bind parameter.
//!
//! # Connection ownership
//! The pool is normally shared application-wide. [`PostgresStore::from_pool`]
//! takes an existing pool; [`PostgresStore::connect`] builds one and runs the
//! embedded migrations.
use super::{PolicyStore, StoreError, StoreResult, rewrite_width};
use crate::config::PostgresConfig;
use anyhow::anyhow;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use std::str::FromStr;
use std::time::Duration;
use warden_authz::{
    ColumnMatcher, FieldMatch, Filter, MAX_FIELDS, PolicyRule, field_window, validate_fields,
};

/// Value columns in positional order.
const COLUMNS: [&str; MAX_FIELDS] = ["v0", "v1", "v2", "v3", "v4", "v5"];

/// Rows per multi-row INSERT; keeps bind counts far below the protocol limit.
const INSERT_CHUNK: usize = 1_000;

const SELECT_RULES: &str = "SELECT id, ptype, v0, v1, v2, v3, v4, v5 FROM casbin_rule";

/// Durable policy store backed by Postgres.
///
/// # Example
/// ```rust,no_run
/// use policyd::config::PostgresConfig;
/// use policyd::store::postgres::PostgresStore;
///
/// async fn open(pg: PostgresConfig) {
///     let _ = PostgresStore::connect(&pg).await;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape of `casbin_rule`.
#[derive(Debug, Clone, FromRow)]
struct DbRule {
    id: i64,
    ptype: String,
    v0: Option<String>,
    v1: Option<String>,
    v2: Option<String>,
    v3: Option<String>,
    v4: Option<String>,
    v5: Option<String>,
}

impl DbRule {
    fn into_rule(self) -> StoreResult<PolicyRule> {
        let mut columns = vec![self.v0, self.v1, self.v2, self.v3, self.v4, self.v5];
        while columns.last().is_some_and(Option::is_none) {
            columns.pop();
        }
        // A NULL followed by set columns was cleared by a rewrite.
        let values: Vec<String> = columns
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect();
        if values.is_empty() {
            return Err(StoreError::Unexpected(anyhow!(
                "casbin_rule row {} has no fields",
                self.id
            )));
        }
        Ok(PolicyRule {
            ptype: self.ptype,
            values,
        })
    }
}

impl PostgresStore {
    /// Connect to Postgres and run migrations.
    ///
    /// # Errors
    /// - Invalid URL, connection or pool setup failures.
    /// - Migration failures.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let pool = connect_pool(pg).await?;
        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. The schema is assumed to exist.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Unexpected(err.into()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Build a pool from config with bounded acquire waits.
pub async fn connect_pool(pg: &PostgresConfig) -> StoreResult<PgPool> {
    // Avoid logging `pg.url`; it may contain credentials.
    let connect_options = PgConnectOptions::from_str(&pg.url)?;
    let pool = PgPoolOptions::new()
        .max_connections(pg.max_connections)
        .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
        .connect_with(connect_options)
        .await?;
    Ok(pool)
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn load_all(&self) -> StoreResult<Vec<PolicyRule>> {
        let rows: Vec<DbRule> = sqlx::query_as(&format!("{SELECT_RULES} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(DbRule::into_rule).collect()
    }

    async fn load_filtered(&self, filter: &Filter) -> StoreResult<Vec<PolicyRule>> {
        let mut conn = self.pool.acquire().await?;
        select_filtered(&mut conn, filter).await
    }

    async fn save_all(&self, rules: &[PolicyRule]) -> StoreResult<()> {
        for rule in rules {
            validate_fields(&rule.values)?;
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM casbin_rule")
            .execute(&mut *tx)
            .await?;
        insert_rules(
            &mut tx,
            rules
                .iter()
                .map(|rule| (rule.ptype.as_str(), rule.values.as_slice())),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_rule(&self, ptype: &str, values: &[String]) -> StoreResult<()> {
        validate_fields(values)?;
        let mut tx = self.pool.begin().await?;
        insert_rules(&mut tx, std::iter::once((ptype, values))).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<()> {
        for rule in rules {
            validate_fields(rule)?;
        }
        let mut tx = self.pool.begin().await?;
        insert_rules(&mut tx, rules.iter().map(|rule| (ptype, rule.as_slice()))).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_rule(&self, ptype: &str, values: &[String]) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM casbin_rule WHERE ptype = ");
        builder.push_bind(ptype.to_string());
        push_leading(&mut builder, values);
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_rules(&self, ptype: &str, rules: &[Vec<String>]) -> StoreResult<u64> {
        if rules.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let removed = delete_columnwise(&mut tx, ptype, &ColumnMatcher::new(rules)).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn remove_filtered(
        &self,
        ptype: &str,
        field_index: usize,
        values: &[FieldMatch],
    ) -> StoreResult<bool> {
        let Ok(window) = field_window(field_index, values.len()) else {
            return Ok(false);
        };
        let mut tx = self.pool.begin().await?;
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM casbin_rule WHERE ptype = ");
        builder.push_bind(ptype.to_string());
        for (column, value) in window.zip(values) {
            match value.as_exact() {
                Some("") => {
                    builder.push(format!(" AND COALESCE({}, '') = ''", COLUMNS[column]));
                }
                Some(exact) => {
                    builder.push(format!(" AND {} = ", COLUMNS[column]));
                    builder.push_bind(exact.to_string());
                }
                None => {}
            }
        }
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_rule(&self, ptype: &str, old: &[String], new: &[String]) -> StoreResult<()> {
        validate_fields(new)?;
        let mut tx = self.pool.begin().await?;
        rewrite_rule(&mut tx, ptype, old, new).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_rules(
        &self,
        ptype: &str,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> StoreResult<()> {
        if old.len() != new.len() {
            return Err(StoreError::LengthMismatch {
                old: old.len(),
                new: new.len(),
            });
        }
        for rule in new {
            validate_fields(rule)?;
        }
        let mut tx = self.pool.begin().await?;
        for (old_rule, new_rule) in old.iter().zip(new) {
            rewrite_rule(&mut tx, ptype, old_rule, new_rule).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_filtered(
        &self,
        ptype: &str,
        new_rules: &[Vec<String>],
        field_index: usize,
        values: &[FieldMatch],
    ) -> StoreResult<Vec<Vec<String>>> {
        let filter = Filter::from_window(ptype, field_index, values)
            .map_err(|err| StoreError::InvalidFilter(err.to_string()))?;
        for rule in new_rules {
            validate_fields(rule)?;
        }
        let mut tx = self.pool.begin().await?;
        let old_rules: Vec<Vec<String>> = select_filtered(&mut tx, &filter)
            .await?
            .into_iter()
            .map(|rule| rule.values)
            .collect();
        if !old_rules.is_empty() {
            delete_columnwise(&mut tx, ptype, &ColumnMatcher::new(&old_rules)).await?;
        }
        insert_rules(&mut tx, new_rules.iter().map(|rule| (ptype, rule.as_slice()))).await?;
        tx.commit().await?;
        Ok(old_rules)
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Append `AND vi = $n` for each leading field. An empty field also matches
/// `NULL`, since absent and empty columns load the same.
fn push_leading(builder: &mut QueryBuilder<'_, Postgres>, values: &[String]) {
    for (column, value) in COLUMNS.iter().zip(values) {
        if value.is_empty() {
            builder.push(format!(" AND COALESCE({column}, '') = ''"));
        } else {
            builder.push(format!(" AND {column} = "));
            builder.push_bind(value.clone());
        }
    }
}

/// Append `AND col = ANY($n)` for each constrained filter column.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    builder.push(" WHERE TRUE");
    if !filter.ptype.is_empty() {
        builder.push(" AND ptype = ANY(");
        builder.push_bind(filter.ptype.clone());
        builder.push(")");
    }
    for (column, allowed) in COLUMNS.iter().zip(&filter.fields) {
        if !allowed.is_empty() {
            builder.push(format!(" AND {column} = ANY("));
            builder.push_bind(allowed.clone());
            builder.push(")");
        }
    }
}

async fn select_filtered(conn: &mut PgConnection, filter: &Filter) -> StoreResult<Vec<PolicyRule>> {
    let mut builder = QueryBuilder::<Postgres>::new(SELECT_RULES);
    push_filter(&mut builder, filter);
    builder.push(" ORDER BY id");
    let rows: Vec<DbRule> = builder.build_query_as().fetch_all(&mut *conn).await?;
    rows.into_iter().map(DbRule::into_rule).collect()
}

async fn delete_columnwise(
    conn: &mut PgConnection,
    ptype: &str,
    matcher: &ColumnMatcher,
) -> StoreResult<u64> {
    let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM casbin_rule WHERE ptype = ");
    builder.push_bind(ptype.to_string());
    for (column, allowed) in COLUMNS.iter().zip(matcher.columns()) {
        builder.push(format!(" AND {column} = ANY("));
        builder.push_bind(allowed.clone());
        builder.push(")");
    }
    let result = builder.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

async fn insert_rules<'a, I>(conn: &mut PgConnection, rules: I) -> StoreResult<()>
where
    I: IntoIterator<Item = (&'a str, &'a [String])>,
{
    let rules: Vec<(&str, &[String])> = rules.into_iter().collect();
    for chunk in rules.chunks(INSERT_CHUNK) {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO casbin_rule (ptype, v0, v1, v2, v3, v4, v5) ",
        );
        builder.push_values(chunk, |mut row, (ptype, values)| {
            row.push_bind(ptype.to_string());
            for index in 0..MAX_FIELDS {
                row.push_bind(values.get(index).cloned());
            }
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|err| map_write_error(err, "rule exists"))?;
    }
    Ok(())
}

/// Locate the single row whose leading fields equal `old` and rewrite
/// columns `0..max(old, new)`: new values where given, `NULL` past `new`.
async fn rewrite_rule(
    conn: &mut PgConnection,
    ptype: &str,
    old: &[String],
    new: &[String],
) -> StoreResult<()> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT id FROM casbin_rule WHERE ptype = ");
    builder.push_bind(ptype.to_string());
    push_leading(&mut builder, old);
    builder.push(" FOR UPDATE");
    let ids: Vec<(i64,)> = builder.build_query_as().fetch_all(&mut *conn).await?;
    let id = match ids.as_slice() {
        [] => {
            return Err(StoreError::NotFound(format!(
                "no {ptype} rule with fields {old:?}"
            )));
        }
        [(id,)] => *id,
        _ => {
            return Err(StoreError::Conflict(format!(
                "{} {ptype} rules match fields {old:?}",
                ids.len()
            )));
        }
    };

    let mut builder = QueryBuilder::<Postgres>::new("UPDATE casbin_rule SET ");
    let mut assignments = builder.separated(", ");
    for (index, column) in COLUMNS.iter().enumerate().take(rewrite_width(old, new)) {
        assignments.push(format!("{column} = "));
        assignments.push_bind_unseparated(new.get(index).cloned());
    }
    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|err| map_write_error(err, "rewritten rule exists"))?;
    Ok(())
}

fn map_write_error(err: sqlx::Error, conflict: &str) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Conflict(conflict.to_string());
    }
    StoreError::Database(err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_rule_keeps_columns_after_a_cleared_one() {
        let row = DbRule {
            id: 1,
            ptype: "p".into(),
            v0: Some("r".into()),
            v1: Some("/b".into()),
            v2: None,
            v3: Some("x".into()),
            v4: Some("y".into()),
            v5: None,
        };
        let rule = row.into_rule().expect("rule");
        assert_eq!(rule.values, vec!["r", "/b", "", "x", "y"]);
    }

    #[test]
    fn db_rule_drops_trailing_nulls() {
        let row = DbRule {
            id: 2,
            ptype: "g".into(),
            v0: Some("u".into()),
            v1: Some("r".into()),
            v2: None,
            v3: None,
            v4: None,
            v5: None,
        };
        assert_eq!(row.into_rule().expect("rule").values, vec!["u", "r"]);
    }

    #[test]
    fn db_rule_without_fields_is_rejected() {
        let row = DbRule {
            id: 7,
            ptype: "p".into(),
            v0: None,
            v1: None,
            v2: None,
            v3: None,
            v4: None,
            v5: None,
        };
        assert!(matches!(row.into_rule(), Err(StoreError::Unexpected(_))));
    }

    #[test]
    fn filter_sql_uses_allowlisted_columns() {
        let filter = Filter::new()
            .ptype("p")
            .field(2, ["GET", "POST"])
            .expect("filter");
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_RULES);
        push_filter(&mut builder, &filter);
        assert_eq!(
            builder.sql(),
            format!("{SELECT_RULES} WHERE TRUE AND ptype = ANY($1) AND v2 = ANY($2)")
        );
    }

    #[test]
    fn leading_sql_binds_each_field() {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM casbin_rule WHERE ptype = ");
        builder.push_bind("p".to_string());
        push_leading(&mut builder, &["r".to_string(), String::new(), "/a".to_string()]);
        assert_eq!(
            builder.sql(),
            "DELETE FROM casbin_rule WHERE ptype = $1 AND v0 = $2 AND COALESCE(v1, '') = '' AND v2 = $3"
        );
    }

    #[test]
    fn unique_violation_detection_ignores_other_errors() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(matches!(
            map_write_error(sqlx::Error::RowNotFound, "x"),
            StoreError::Database(_)
        ));
    }
}
