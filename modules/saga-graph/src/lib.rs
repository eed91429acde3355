pub mod client;
pub mod migrate;
pub mod writer;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use writer::{ClaimRow, GraphWriter};

// Re-export neo4rs query builder for ad hoc Cypher in tests and tooling.
pub use neo4rs::query;
