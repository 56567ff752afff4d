// Persistence layer
//
// The `WorkflowStore` trait is the only surface the engine sees. Two
// implementations with identical semantics: PostgreSQL over sqlx for
// production, in-memory for tests.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryWorkflowStore;
pub use models::*;
pub use postgres::PostgresWorkflowStore;
pub use store::{StoreHealth, WorkflowStore};
