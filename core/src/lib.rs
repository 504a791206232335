pub mod clock;
pub mod codec;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod record;
pub mod remote;
pub mod repository;
pub mod service;
pub mod sync;

pub use error::{Result, SyncError};
pub use service::{SyncFacade, SyncState};
