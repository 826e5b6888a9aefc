use crate::crud::{CrudError, Entity, Store};
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// An entity backed by a single Postgres table.
pub trait PgEntity: Entity + for<'r> FromRow<'r, PgRow> + Unpin {
    const TABLE: &'static str;
    const ID_COLUMN: &'static str;
    /// Non-key columns, in the order `bind_columns` binds them.
    const COLUMNS: &'static [&'static str];

    fn bind_columns<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments>;
}

/// One unit of work against the database.
///
/// A transaction is begun on first use and stays open until [`Session::commit`].
/// Dropping a session with an open transaction rolls it back.
pub struct Session {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl Session {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    /// Connection inside the current transaction, beginning one if needed.
    pub async fn conn(&mut self) -> Result<&mut PgConnection, sqlx::Error> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(sqlx::Error::PoolClosed),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub async fn commit(&mut self) -> Result<(), sqlx::Error> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

fn select_list<E: PgEntity>() -> String {
    std::iter::once(E::ID_COLUMN)
        .chain(E::COLUMNS.iter().copied())
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_error<E: PgEntity>(err: sqlx::Error) -> CrudError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => CrudError::Duplicate { entity: E::NAME },
        _ => CrudError::Db(err),
    }
}

#[async_trait]
impl<E: PgEntity> Store<E> for Session {
    async fn fetch_one(&mut self, id: Uuid) -> Result<E, CrudError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = $1 LIMIT 2",
            select_list::<E>(),
            E::TABLE,
            E::ID_COLUMN
        );
        let conn = self.conn().await?;
        let mut rows = sqlx::query_as::<_, E>(&sql)
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        match (rows.pop(), rows.is_empty()) {
            (Some(row), true) => Ok(row),
            _ => Err(CrudError::NotFound { entity: E::NAME }),
        }
    }

    async fn fetch_all(&mut self) -> Result<Vec<E>, CrudError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            select_list::<E>(),
            E::TABLE,
            E::ID_COLUMN
        );
        let conn = self.conn().await?;
        Ok(sqlx::query_as::<_, E>(&sql).fetch_all(&mut *conn).await?)
    }

    async fn exists(&mut self, id: Uuid) -> Result<bool, CrudError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = $1)",
            E::TABLE,
            E::ID_COLUMN
        );
        let conn = self.conn().await?;
        Ok(sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_one(&mut *conn)
            .await?)
    }

    async fn insert(&mut self, entity: &E) -> Result<(), CrudError> {
        let placeholders = (1..=E::COLUMNS.len() + 1)
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            E::TABLE,
            select_list::<E>(),
            placeholders
        );
        let conn = self.conn().await?;
        entity
            .bind_columns(sqlx::query(&sql).bind(entity.id()))
            .execute(&mut *conn)
            .await
            .map_err(write_error::<E>)?;
        Ok(())
    }

    async fn save(&mut self, entity: &E) -> Result<(), CrudError> {
        let assignments = E::COLUMNS
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} = ${}", col, i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = $1",
            E::TABLE,
            assignments,
            E::ID_COLUMN
        );
        let conn = self.conn().await?;
        let result = entity
            .bind_columns(sqlx::query(&sql).bind(entity.id()))
            .execute(&mut *conn)
            .await
            .map_err(write_error::<E>)?;
        if result.rows_affected() == 0 {
            return Err(CrudError::NotFound { entity: E::NAME });
        }
        Ok(())
    }

    async fn remove(&mut self, entity: &E) -> Result<(), CrudError> {
        let sql = format!("DELETE FROM {} WHERE {} = $1", E::TABLE, E::ID_COLUMN);
        let conn = self.conn().await?;
        let result = sqlx::query(&sql)
            .bind(entity.id())
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CrudError::NotFound { entity: E::NAME });
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CrudError> {
        Session::commit(self).await?;
        Ok(())
    }
}
