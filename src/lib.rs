pub mod db;
pub mod enrichment;
pub mod error;
pub mod models;
pub mod schema;
pub mod session;
pub mod settings;
pub mod store;
pub mod utils;
