use crate::domain::models::RemoteSession;
use crate::infrastructure::error::EngineError;
use async_trait::async_trait;

/// The one remote query this engine consumes: completed workout sessions for
/// a user. Transport lives outside the crate; callers provide an
/// implementation over whatever client they already have.
#[async_trait]
pub trait WorkoutSessionSource: Send + Sync {
    async fn completed_sessions(&self, user_id: &str) -> Result<Vec<RemoteSession>, EngineError>;
}
