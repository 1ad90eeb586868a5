pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod tasks;
pub mod validation;

pub use config::ChainConfig;
pub use error::ChainError;
pub use pipeline::{
    BoxedStage, Chain, ChainExecutor, ChainHandle, ExecutorConfig, RunState, StageInfo, StageKind,
    build_chain,
};
