pub mod config;
pub mod db;
pub mod db_init;
pub mod db_statements;
pub mod errors;
pub mod hello_utils;
pub mod telemetry;
pub mod trace_middleware;
