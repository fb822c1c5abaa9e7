pub mod cache;
pub mod clock;
pub mod config;
pub mod locks;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod service;
pub mod status;
pub mod store;
pub mod sweeper;
pub mod wal;
