pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod identity;
pub mod logging;
pub mod models;
pub mod push;
pub mod query;
pub mod search;
pub mod source;
pub mod sync;
pub mod timestamp;
mod migrations;

pub use db::{open_store, open_store_in_memory, ShadowDb};
pub use error::CoreError;
