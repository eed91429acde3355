pub mod adapter;
pub mod claude;
pub mod decisions;
pub mod error;
pub mod prompts;
pub mod schema;
pub mod traits;
pub mod util;

pub use adapter::Oracle;
pub use claude::ClaudeOracle;
pub use decisions::*;
pub use error::OracleError;
pub use prompts::Contender;
pub use schema::StructuredOutput;
pub use traits::{DecisionKind, DecisionOracle, OracleRequest};
