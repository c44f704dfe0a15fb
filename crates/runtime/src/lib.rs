pub mod context;
pub mod finalize;
pub mod placeholder;
pub mod prompt_builder;
mod session;
pub mod turn_loop;

pub use context::ExecutionContext;
pub use finalize::{FinalizedReply, finalize_reply};
pub use placeholder::PlaceholderResolver;
pub use session::{AgentRunResult, ExecutionSession, SessionError, SessionOutcome};
pub use turn_loop::{MAX_TURNS, TranscriptEntry, TurnLoop, TurnLoopOutcome};
