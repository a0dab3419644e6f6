//! # pgcompose
//!
//! A schema-driven query-composition engine for PostgreSQL.
//!
//! ## Features
//!
//! - **Chainable Composer**: filter/join/order/group/limit intent
//!   accumulates across calls and compiles to exactly one parameterized SQL
//!   statement
//! - **Relationship graph**: named associations between record types
//!   resolve into join chains, with per-hop aliasing for self-joins and
//!   repeated tables
//! - **Nested-chain semantics**: a `.filter()` after a `.limit()` ranges
//!   over the already-limited row set via subquery nesting
//! - **Injection-safe by construction**: identifiers pass through a single
//!   quoting point; values only ever travel in the parameter array, with a
//!   threaded cursor keeping `$n` placeholders aligned
//! - **Hydration**: joined result columns (`alias$column`) re-nest into
//!   per-relationship record collections
//!
//! ## Usage
//!
//! ```ignore
//! use pgcompose::{query, predicates, Direction, JoinOptions};
//!
//! // Startup: declare schema and relationships once.
//! let children = graph.of("children");
//! let parents = graph.of("parents");
//! graph.joins_to(children, parents, JoinOptions::multiple());
//!
//! // Per query: compose, then execute through a tokio-postgres client.
//! let rows = query(&schema, &graph, "parents")?
//!     .join("children", vec![])?
//!     .filter([predicates! { "children__age__gte" => 10 }])?
//!     .order_by("id", Direction::Asc)?
//!     .limit(0, 2)
//!     .end(&client)
//!     .await?;
//! ```

pub mod client;
pub mod composer;
pub mod dialect;
pub mod error;
pub mod graph;
pub mod ident;
pub mod schema;
pub mod value;

pub use client::Database;
pub use composer::{
    AggregateColumn, Composer, DecodedRow, Direction, FilterGroup, JoinMeta, Record, insert, query,
};
pub use dialect::{AggregateFn, Comparator, JoinDescriptor, WhereObject};
pub use error::{ComposeError, ComposeResult};
pub use graph::{
    EdgeId, EdgeOptions, JoinOptions, NodeId, PathHop, RelationshipGraph, RelationshipPath,
};
pub use schema::{ColumnSchema, DataType, Schema, TableSchema};
pub use value::Value;
