//! Persistence layer — libSQL-backed storage for users, rides and search
//! history.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{DriverContact, Ride, SearchRecord, SearchTriple, Stats, User};
pub use traits::RecordStore;
