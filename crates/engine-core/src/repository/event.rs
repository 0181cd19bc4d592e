//! Event repository trait definition.

use chrono::{DateTime, Utc};
use engine_types::error::RepositoryError;
use engine_types::event::Event;
use uuid::Uuid;

pub trait EventRepository: Send + Sync {
    fn append_event(
        &self,
        event: &Event,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Events in a project within `[start, end]`, most recent first -- feeds
    /// the activity aggregator's event-derived activities (§4.5).
    fn list_recent(
        &self,
        project_id: &Uuid,
        contact_id: Option<&Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Event>, RepositoryError>> + Send;

    /// Count of events in a project within a trailing window (`GetRecentActivityCount`).
    fn count_since(
        &self,
        project_id: &Uuid,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
