//! Campaign repository trait definition.

use engine_types::campaign::Campaign;
use engine_types::error::RepositoryError;
use uuid::Uuid;

pub trait CampaignRepository: Send + Sync {
    fn create_campaign(
        &self,
        campaign: &Campaign,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_campaign(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Campaign>, RepositoryError>> + Send;

    fn update_campaign(
        &self,
        campaign: &Campaign,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically increment `sentCount`/`deliveredCount`/etc by the given
    /// deltas. Used by `ProcessBatch` so concurrent per-email sends never
    /// lose an increment to a read-modify-write race.
    fn increment_counts(
        &self,
        id: &Uuid,
        sent_delta: u32,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_campaigns(
        &self,
        project_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Campaign>, RepositoryError>> + Send;
}
