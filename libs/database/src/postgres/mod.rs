//! PostgreSQL pool, health probe and unit of work (SeaORM).

mod config;
mod connector;
mod health;
mod unit_of_work;

pub use config::PostgresConfig;
pub use connector::{connect, connect_from_config, connect_from_config_with_retry};
pub use health::check_health;
pub use unit_of_work::PostgresUnitOfWork;

pub use sea_orm::{ConnectOptions, DatabaseConnection, DatabaseTransaction, DbErr};
