//! SQL queries over service pipelines.
//!
//! ```text
//! text ─► sqlparser ─► lower ─► resolve ─► push-down ─► generator ─► executor
//!                                 │            │
//!                          ServiceCatalog   service variables
//! ```
//!
//! A query reads one table: either a registered service (a pipeline whose
//! output step produces the rows) or `dual`, a single empty row.

pub mod error;
pub mod executor;
pub mod generator;
pub mod parser;
pub mod pushdown;
pub mod service;

pub use error::{SqlError, SqlResult};
pub use executor::{QueryExecution, QueryOutput, QueryResult, QueryState, SqlExecutor};
pub use generator::GeneratedQuery;
pub use parser::{parse, Projection, Query};
pub use pushdown::{push_down, PushDown};
pub use service::{FieldMapping, PushDownKind, ServiceCatalog, ServiceDescriptor};
