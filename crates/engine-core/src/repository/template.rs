//! Email template repository trait definition.

use engine_types::error::RepositoryError;
use engine_types::template::EmailTemplate;

pub trait TemplateRepository: Send + Sync {
    fn get_template(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<EmailTemplate>, RepositoryError>> + Send;
}
