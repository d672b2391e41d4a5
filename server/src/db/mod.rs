pub mod migrations;
pub mod models;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

/// Feed database file name inside the data directory.
pub const DB_FILE: &str = "feeds.db";

/// Shared feed database handle. Store calls run under `spawn_blocking`.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open `<data_dir>/feeds.db`, creating the directory and schema as needed.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join(DB_FILE);
    let mut conn = Connection::open(&db_path)?;

    // Feed reads must not block on ingestion writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!(path = %db_path.display(), "Feed database ready");

    Ok(Arc::new(Mutex::new(conn)))
}
