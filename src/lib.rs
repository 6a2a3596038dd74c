pub mod auth;
pub mod campus;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod period;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
