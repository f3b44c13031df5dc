pub mod in_memory;
pub mod models;
pub mod postgres;

pub use in_memory::InMemoryPersistence;
pub use postgres::PostgresPersistence;
