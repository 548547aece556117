//! Types shared by every entimap crate
//!
//! Only the structured-logging vocabulary lives here, so the lifecycle
//! macros exported by `entimap-core` can name event values from any crate
//! that expands them.

pub mod schema;

pub use schema::Lifecycle;
