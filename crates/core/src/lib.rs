pub mod clock;
pub mod config;
pub mod error;
pub mod graph;
pub mod identity;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CouncilProviderConfig, ForgeConfig, LlmProvider};
pub use error::{Error, ErrorKind, Result};
pub use graph::{GraphStore, MemoryGraph, NodeFilter, NodeProps, SortOrder};
pub use identity::{IdMinter, SequentialMinter, UuidMinter};
pub use types::*;

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
