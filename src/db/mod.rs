// Postgres persistence
pub mod postgres;

pub use postgres::PostgresSessionRepository;
