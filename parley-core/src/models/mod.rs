pub mod session;
pub mod turn;
pub mod usage;

pub use session::ConversationSession;
pub use turn::{Feedback, Role, Turn};
pub use usage::TokenUsage;
