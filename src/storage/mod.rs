pub mod memory;
pub mod postgres;
pub mod traits;

#[cfg(test)]
pub(crate) mod flaky;

pub use memory::InMemoryStore;
pub use postgres::PostgresStorage;
pub use traits::Storage;
