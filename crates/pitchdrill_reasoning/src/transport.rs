use crate::api_types::{SessionConfig, SessionUpdate, TurnRequest, TurnResponse};
use async_trait::async_trait;
use pitchdrill_core::{ServiceCallError, TransportError};

/// The hosted conversation service, as seen by a persona session.
///
/// Implementations own whatever connection they need. The session never
/// touches the network directly, which is what lets tests drive it with
/// [`crate::providers::mock::MockTransport`].
#[async_trait]
pub trait ConversationTransport: Send + Sync {
    /// Open the connection and announce the session.
    async fn connect(&self, session: &SessionConfig) -> Result<(), TransportError>;

    /// Send one turn and wait for the generated reply.
    async fn send_turn(&self, request: TurnRequest) -> Result<TurnResponse, ServiceCallError>;

    /// Push refreshed instructions and metadata after the affect level moved.
    async fn update_session(&self, update: SessionUpdate) -> Result<(), ServiceCallError>;

    async fn close(&self) {}

    fn name(&self) -> &'static str;
}
