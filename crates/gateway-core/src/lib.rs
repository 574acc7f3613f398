//! # gateway-core
//!
//! The table registry and query-intent data model shared by every other crate
//! in the gateway.
//!
//! ```text
//! +-------------------+        +-----------------------+
//! |   TableRegistry    |<-------|   gateway-sql::validator |
//! | (spans, traces, …) |        +-----------------------+
//! +-------------------+
//!           ^
//!           |              +-----------------------+
//!           +--------------|  gateway-sql::builder   |
//!                          |  gateway-sql::analyzer   |
//!                          +-----------------------+
//! ```
//!
//! The registry is seeded once at process start and never mutated; widening
//! tenant access is a deploy-time decision. The intent model is the JSON shape
//! the builder compiles and the analyzer reconstructs.

pub mod intent;
pub mod registry;

pub use intent::{Filter, FilterOp, Metric, OrderBy, OrderDirection, QueryIntent, TimeRange};
pub use registry::{TableRegistry, TableSchema};
