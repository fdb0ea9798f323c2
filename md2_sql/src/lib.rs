//! The SQL gateway: a bounded query queue serviced one at a time over a
//! single Postgres connection, plus the two `LISTEN` channels that feed work
//! into the queue from the database side.

mod call;
mod error;
mod gateway;
mod queue;
mod result;
mod state;

pub use call::SqlCall;
pub use error::SqlError;
pub use gateway::SqlGateway;
pub use queue::{QueryCallback, QueryEntry, QueryQueue};
pub use result::QueryResult;
pub use state::GatewayState;
