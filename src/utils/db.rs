#![forbid(unsafe_code)]

use anyhow::Result;
use log::info;
use sqlx::{Sqlite, Pool};

use crate::utils::db_statements::UPSERT_INCREMENT_STAT;

// ---------------------------------------------------------------------------
// get_and_increment:
// ---------------------------------------------------------------------------
/** Atomically bump the visit counter for a name and return the new count.
 * A name seen for the first time is inserted with a count of 1.
 * 
 * The increment is a single upsert statement run inside a transaction, so
 * concurrent callers can't lose updates regardless of isolation level.  Any
 * error is returned to the caller without retrying.
 */
pub async fn get_and_increment(db: &Pool<Sqlite>, name: &str) -> Result<i64> {
    // Get a connection to the db and start a transaction.  Uncommited transactions 
    // are automatically rolled back when they go out of scope. 
    // See https://docs.rs/sqlx/latest/sqlx/struct.Transaction.html.
    let mut tx = db.begin().await?;

    let count: i64 = sqlx::query_scalar(UPSERT_INCREMENT_STAT)
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

    // Commit the transaction.
    tx.commit().await?;

    if count == 1 {
        info!("name={}: initialised count to 1", name);
    } else {
        info!("name={}: updated count to {}", name, count);
    }
    Ok(count)
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
mod tests {
    use super::get_and_increment;
    use crate::utils::db_init::init_db;
    use crate::utils::db_statements::GET_COUNT;
    use sqlx::{Sqlite, Pool};

    // Current count for a name, read outside of any increment.
    async fn get_count(db: &Pool<Sqlite>, name: &str) -> Option<i64> {
        sqlx::query_scalar::<_, i64>(GET_COUNT)
            .bind(name)
            .fetch_optional(db)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn counts_up_from_one() {
        let db = init_db().await.unwrap();
        for k in 1..=5 {
            assert_eq!(get_and_increment(&db, "world").await.unwrap(), k);
        }
        assert_eq!(get_count(&db, "world").await, Some(5));
    }

    #[tokio::test]
    async fn names_are_independent() {
        let db = init_db().await.unwrap();
        get_and_increment(&db, "a").await.unwrap();
        get_and_increment(&db, "a").await.unwrap();
        assert_eq!(get_and_increment(&db, "b").await.unwrap(), 1);
        assert_eq!(get_count(&db, "a").await, Some(2));
        assert_eq!(get_count(&db, "c").await, None);
    }

    #[tokio::test]
    async fn names_are_case_sensitive() {
        let db = init_db().await.unwrap();
        get_and_increment(&db, "World").await.unwrap();
        assert_eq!(get_and_increment(&db, "world").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let db = init_db().await.unwrap();
        let tasks = (0..50).map(|_| {
            let db = db.clone();
            tokio::spawn(async move { get_and_increment(&db, "busy").await })
        });
        let mut counts: Vec<i64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();
        counts.sort_unstable();

        assert_eq!(counts, (1..=50).collect::<Vec<i64>>());
        assert_eq!(get_count(&db, "busy").await, Some(50));
    }
}
