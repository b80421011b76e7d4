use std::sync::Arc;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::AppResult;

const PRAGMAS: [&str; 3] =
    ["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL", "PRAGMA foreign_keys=ON"];

/// Pool handle shared by the stores.
///
/// SQLite admits one writer at a time, and a deferred transaction that has
/// already read cannot wait for the write lock: it fails with `SQLITE_BUSY`.
/// Every write therefore runs under [`Db::writer`].
#[derive(Clone)]
pub struct Db {
    pub conn: DatabaseConnection,
    writer: Arc<Mutex<()>>,
}

impl Db {
    fn new(conn: DatabaseConnection) -> Self {
        Self { conn, writer: Arc::new(Mutex::new(())) }
    }

    /// Held for the whole of a write, from its first read to its commit.
    pub async fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }
}

pub async fn connect_and_migrate(database_url: &str, max_connections: u32) -> AppResult<Db> {
    let mut opts = ConnectOptions::new(database_url.to_string());
    opts.max_connections(max_connections.max(1)).sqlx_logging(false);

    let db = Database::connect(opts).await?;

    for pragma in PRAGMAS {
        db.execute(Statement::from_string(db.get_database_backend(), pragma.to_string())).await?;
    }

    Migrator::up(&db, None).await?;
    Ok(Db::new(db))
}

#[cfg(test)]
pub async fn memory() -> Db {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(opts).await.unwrap();
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys=ON".to_string(),
    ))
    .await
    .unwrap();
    Migrator::up(&db, None).await.unwrap();
    Db::new(db)
}
