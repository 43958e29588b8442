//! CI gateway data models.

pub mod build;
pub mod deployment;
pub mod events;
pub mod hook;
pub mod repo;
pub mod secret;
pub mod webhook;

pub use build::{Build, BuildDraft, BuildStatus};
pub use deployment::Deployment;
pub use events::{AllowEvents, EventAction, EventType};
pub use hook::{Hook, HookStatus};
pub use repo::{ApprovePolicy, Repository, User};
pub use secret::Secret;
pub use webhook::{Installation, PullRequestExtras, SkipPolicy, Webhook};
