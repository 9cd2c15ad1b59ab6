pub mod directory;
pub mod memory;
pub mod postgres;

pub use directory::InMemoryDirectory;
pub use memory::InMemoryPaymentRepository;
pub use postgres::PostgresPaymentRepository;
