//! Webhook pipeline services: sequencing, reconciliation, admission, and
//! the background hand-off.

pub mod admission_service;
pub mod background;
pub mod build_service;
pub mod cancel_service;
pub mod deployment_service;
pub mod hook_service;
pub mod installation_service;
pub mod publish_service;
pub mod repo_service;

pub use background::BackgroundWork;
pub use hook_service::RetryPolicy;
