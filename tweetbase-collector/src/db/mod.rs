pub mod connection;
pub mod queries;
pub mod repositories;
pub mod schema;

pub use connection::{Database, DbConnection, DbPool};
pub use queries::{IntervalIter, QueryRepository, TimedEntity};
