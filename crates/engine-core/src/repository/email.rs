//! Email repository trait definition.

use chrono::{DateTime, Utc};
use engine_types::email::Email;
use engine_types::error::RepositoryError;
use uuid::Uuid;

pub trait EmailRepository: Send + Sync {
    fn create_email(
        &self,
        email: &Email,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_email(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Email>, RepositoryError>> + Send;

    fn update_email(
        &self,
        email: &Email,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Emails in a project with any of the five timestamp fields set within
    /// `[start, end]`, most recent first -- feeds the activity aggregator's
    /// email-derived activities (§4.5).
    fn list_recent(
        &self,
        project_id: &Uuid,
        contact_id: Option<&Uuid>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Email>, RepositoryError>> + Send;
}
