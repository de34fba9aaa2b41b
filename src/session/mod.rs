pub mod history;
pub mod registry;
pub mod types;

pub use history::MessageHistory;
pub use registry::{SessionRegistry, is_expired};
pub use types::{ChatMessage, MessageRole, RegistryStats, SessionConfig};
