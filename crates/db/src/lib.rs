pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_or_create, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    CreateUserOutcome, InMemoryStore, PurgeCounts, Repositories, RepositoryError,
};
