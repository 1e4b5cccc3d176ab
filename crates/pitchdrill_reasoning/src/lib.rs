pub mod api_types;
pub mod coach;
pub mod correlation;
pub mod providers;
pub mod retry;
pub mod session;
pub mod transport;

pub use coach::{CallCoach, CoachReport, DEFAULT_COACH_MODEL};
pub use providers::build_transport;
pub use session::{PersonaSession, SessionOptions, TurnInput, ERROR_REPLY, INAUDIBLE};
pub use transport::ConversationTransport;
