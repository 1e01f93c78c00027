#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use sqlx::{Sqlite, Pool};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use log::{info, error};
use crate::utils::errors::Errors;
use crate::utils::db_statements::CREATE_STATS_TABLE;

// Database constants.
const DB_URL: &str = "sqlite::memory:";

// Each sqlite connection opened on ":memory:" gets its own private database,
// so the pool is pinned to a single connection that is never recycled.
const POOL_MIN_CONNECTIONS: u32 = 1;
const POOL_MAX_CONNECTIONS: u32 = 1;

// ---------------------------------------------------------------------------
// init_db:
// ---------------------------------------------------------------------------
/** Open the in-memory stats database and create its single table.  The 
 * database lives exactly as long as the returned pool.
 */
pub async fn init_db() -> Result<Pool<Sqlite>> {
    let options = match SqliteConnectOptions::from_str(DB_URL) {
        Ok(o) => o.foreign_keys(true),
        Err(e) => {
            let msg = Errors::DBError(format!("database {} options error: {}", DB_URL, e));
            error!("{}", msg);
            return Err(anyhow!(msg));
        }
    };

    // Create the database connection pool.
    let db = match SqlitePoolOptions::new()
        .min_connections(POOL_MIN_CONNECTIONS)
        .max_connections(POOL_MAX_CONNECTIONS)
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect_with(options).await {
            Ok(db) => db,
            Err(e) => {
                let msg = Errors::DBError(format!("database {} open error: {}", DB_URL, e));
                error!("{}", msg);
                return Err(anyhow!(msg));
            }
        };

    // Create the schema.
    if let Err(e) = sqlx::query(CREATE_STATS_TABLE).execute(&db).await {
        let msg = Errors::DBError(format!("stats table create error: {}", e));
        error!("{}", msg);
        return Err(anyhow!(msg));
    }

    info!("In-memory database {} initialized", DB_URL);
    Ok(db)
}
