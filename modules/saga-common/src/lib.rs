pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use config::{
    load_config, CapacityConfig, Config, FileConfig, OracleConfig, SchedulerConfig, TierLimits,
};
pub use error::SagaError;
pub use policy::*;
pub use types::*;
