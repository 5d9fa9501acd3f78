pub mod access;
pub mod arbiter;
pub mod compactor;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod input;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod store;
pub mod wal;
pub mod wire;
