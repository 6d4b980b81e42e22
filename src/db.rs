pub mod store;
pub use store::EntitlementStore;
pub mod memory_repo;
pub use memory_repo::MemoryStore;
pub mod pg_repo;
pub use pg_repo::PgStore;
