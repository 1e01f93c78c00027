// This file contains all SQL statements issued by the hello server.
#![forbid(unsafe_code)]

// ========================= stats table =========================
pub const CREATE_STATS_TABLE: &str = concat!(
    "CREATE TABLE IF NOT EXISTS stats (",
    "name TEXT PRIMARY KEY, ",
    "count INTEGER NOT NULL)",
);

// Insert the first visit or bump an existing counter in one statement.
// The post-increment count is returned either way.
pub const UPSERT_INCREMENT_STAT: &str = concat!(
    "INSERT INTO stats (name, count) VALUES (?, 1) ",
    "ON CONFLICT(name) DO UPDATE SET count = count + 1 ",
    "RETURNING count",
);

#[cfg(test)]
pub const GET_COUNT: &str = concat!(
    "SELECT count FROM stats WHERE name = ?"
);
