pub mod analyzer;
pub mod brain;
pub mod config;
pub mod context;
pub mod delegate;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod router;

pub use analyzer::QueryAnalyzer;
pub use brain::{encode_frame, Brain};
pub use config::{BrainConfig, ConfigResolver, AGENT_TYPE};
pub use context::ContextLoader;
pub use delegate::DelegateClient;
pub use error::BrainError;
pub use router::RouteDecision;
