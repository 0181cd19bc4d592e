//! Contact and segment repository trait definitions.

use engine_types::contact::{AudienceFilter, Contact, Segment};
use engine_types::error::RepositoryError;
use serde_json::Value;
use uuid::Uuid;

pub trait ContactRepository: Send + Sync {
    fn get_contact(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Contact>, RepositoryError>> + Send;

    fn update_contact_data(
        &self,
        id: &Uuid,
        data: &Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_segment(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Segment>, RepositoryError>> + Send;

    /// Count of subscribed contacts in a project matching the given
    /// AND-of-filters (empty filter list means "all subscribed contacts").
    fn count_audience(
        &self,
        project_id: &Uuid,
        filters: &[AudienceFilter],
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Cursor-paginated audience page, ordered by contact id ascending
    /// (spec.md §4.4, §6). Fetches up to `limit` rows with id strictly
    /// greater than `after` (when supplied).
    fn page_audience(
        &self,
        project_id: &Uuid,
        filters: &[AudienceFilter],
        after: Option<&Uuid>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Contact>, RepositoryError>> + Send;
}
