//! Webhook pipeline: verifies and classifies each delivery, then routes it
//! to installation processing, repository reconciliation, or build admission.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::Span;

use crate::compiler::{AutoCancel, CompiledPipeline, Compiler};
use crate::config::CiConfig;
use crate::error::WebhookError;
use crate::models::{Build, BuildStatus, EventType, Hook, HookStatus, Repository, Webhook};
use crate::queue::QueueItem;
use crate::scm::{ParseError, RawWebhook, SourceControl};
use crate::services::{
    admission_service, build_service, cancel_service, deployment_service, hook_service,
    installation_service, publish_service, repo_service, RetryPolicy,
};
use crate::store::{Store, StoreError};

use super::CiRouterState;

/// What the provider is told about a delivery.
#[derive(Debug)]
pub enum WebhookResponse {
    /// Acknowledged without a build.
    Message(String),
    /// Redelivery of a delivery that already has a hook.
    Duplicate(String),
    /// Repository changed by a lifecycle event.
    Repository(Box<Repository>),
    /// Build admitted (queued or awaiting approval).
    Build(Box<Build>),
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        match self {
            WebhookResponse::Message(message) | WebhookResponse::Duplicate(message) => {
                (StatusCode::OK, Json(json!({ "message": message }))).into_response()
            }
            WebhookResponse::Repository(repo) => (StatusCode::OK, Json(repo)).into_response(),
            WebhookResponse::Build(build) => (StatusCode::CREATED, Json(build)).into_response(),
        }
    }
}

/// Dependencies of one delivery, built once and passed down by reference.
pub struct WebhookContext<'a> {
    state: &'a CiRouterState,
    pub retry: RetryPolicy,
    pub span: Span,
}

impl<'a> WebhookContext<'a> {
    fn new(state: &'a CiRouterState, span: Span) -> Self {
        Self {
            state,
            retry: state.config.retry_policy(),
            span,
        }
    }

    fn store(&self) -> &dyn Store {
        self.state.store.as_ref()
    }

    fn scm(&self) -> &dyn SourceControl {
        self.state.scm.as_ref()
    }

    fn compiler(&self) -> &dyn Compiler {
        self.state.compiler.as_ref()
    }

    fn config(&self) -> &CiConfig {
        &self.state.config
    }

    /// Check the delivery signature against `key` unless validation is off.
    fn verify(&self, raw: &RawWebhook, key: &str) -> Result<(), WebhookError> {
        if !self.config().webhook_validation {
            return Ok(());
        }
        self.scm().verify_webhook(raw, key.as_bytes()).map_err(|e| {
            tracing::warn!(error = %e, "Webhook signature validation failed");
            WebhookError::from(e)
        })
    }
}

/// Handle an incoming provider webhook delivery.
pub async fn handle_webhook(
    state: &CiRouterState,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResponse, WebhookError> {
    let raw = RawWebhook::new(headers, body);

    let webhook = match state.scm.process_webhook(&raw) {
        Ok(webhook) => webhook,
        Err(ParseError::UnsupportedEvent(event)) => {
            tracing::debug!(event = %event, "Ignoring webhook event");
            return Ok(WebhookResponse::Message(format!(
                "{event} event: no build to process"
            )));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unable to parse webhook");
            return Err(e.into());
        }
    };

    let span = tracing::info_span!(
        "webhook",
        delivery = %webhook.hook.source_id,
        event = %webhook.hook.event,
        repo = tracing::field::Empty,
        hook = tracing::field::Empty,
    );

    // processing outlives the request: a timeout or disconnect must not drop
    // a stored build or skip the hook finalizer
    let (tx, rx) = oneshot::channel();
    let task_state = state.clone();
    let task_span = span.clone();
    state.background.spawn(span, async move {
        let ctx = WebhookContext::new(&task_state, task_span);
        let result = route(&ctx, &raw, webhook).await;
        if tx.send(result).is_err() {
            tracing::warn!("Webhook processed after the caller went away");
        }
    });

    rx.await
        .unwrap_or_else(|_| Err(WebhookError::Internal("webhook processing aborted".to_string())))
}

async fn route(
    ctx: &WebhookContext<'_>,
    raw: &RawWebhook,
    webhook: Webhook,
) -> Result<WebhookResponse, WebhookError> {
    match webhook.hook.event {
        EventType::Ping => ping(ctx, raw, webhook).await,
        EventType::Installation => installation(ctx, raw, webhook).await,
        EventType::Repository => {
            let mut hook = webhook.hook.clone();
            let result = repository_event(ctx, raw, &webhook, &mut hook).await;
            finish(ctx, hook, result).await
        }
        EventType::Push
        | EventType::Tag
        | EventType::PullRequest
        | EventType::Comment
        | EventType::Deployment
        | EventType::Delete
        | EventType::Schedule => {
            let mut hook = webhook.hook.clone();
            let result = build_event(ctx, raw, webhook, &mut hook).await;
            finish(ctx, hook, result).await
        }
    }
}

/// Hook finalizer: every exit of repository or build processing passes
/// through here so the hook's terminal state is recorded.
async fn finish(
    ctx: &WebhookContext<'_>,
    mut hook: Hook,
    result: Result<WebhookResponse, WebhookError>,
) -> Result<WebhookResponse, WebhookError> {
    match &result {
        // the first delivery's hook stays as it was
        Ok(WebhookResponse::Duplicate(_)) => return result,
        Ok(_) => {}
        Err(e) => {
            if hook.status == HookStatus::Success || hook.status == HookStatus::Running {
                hook.fail(HookStatus::Failure, e.to_string());
            }
            tracing::warn!(status = %e.status(), error = %e, "Webhook rejected");
        }
    }

    hook_service::finalize_hook(ctx.store(), &hook).await;
    result
}

/// The response for a redelivery of a delivery already recorded on `repo`.
async fn find_duplicate(
    ctx: &WebhookContext<'_>,
    repo: &Repository,
    hook: &Hook,
) -> Result<Option<WebhookResponse>, WebhookError> {
    match ctx.store().get_hook_by_source_id(repo.id, &hook.source_id).await {
        Ok(existing) => {
            tracing::info!(hook = existing.number, "Delivery already processed");
            Ok(Some(WebhookResponse::Duplicate(format!(
                "delivery {} already processed as hook {}",
                existing.source_id, existing.number
            ))))
        }
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn ping(
    ctx: &WebhookContext<'_>,
    raw: &RawWebhook,
    webhook: Webhook,
) -> Result<WebhookResponse, WebhookError> {
    let reason = webhook
        .should_skip(ctx.config().skip_policy())
        .unwrap_or_else(|| "ping event skipped".to_string());

    // only verified pings are recorded
    let Some(incoming) = webhook.repo.as_ref() else {
        return Ok(WebhookResponse::Message(reason));
    };
    let repo = match ctx.store().get_repository(&incoming.org, &incoming.name).await {
        Ok(repo) => repo,
        Err(e) => {
            tracing::debug!(repo = %incoming.full_name, error = %e, "Ping for unknown repo");
            return Ok(WebhookResponse::Message(reason));
        }
    };
    if ctx.verify(raw, &repo.hash).is_err() {
        return Ok(WebhookResponse::Message(reason));
    }

    let mut hook = webhook.hook;
    if let Err(e) = hook_service::sequence_hook(ctx.store(), &mut hook, &repo, ctx.retry).await {
        tracing::warn!(repo = %repo.full_name, error = %e, "Unable to record ping");
        return Ok(WebhookResponse::Message(reason));
    }
    hook.fail(HookStatus::Skipped, reason.clone());
    hook_service::finalize_hook(ctx.store(), &hook).await;

    Ok(WebhookResponse::Message(reason))
}

async fn installation(
    ctx: &WebhookContext<'_>,
    raw: &RawWebhook,
    webhook: Webhook,
) -> Result<WebhookResponse, WebhookError> {
    ctx.verify(raw, &ctx.config().app_webhook_secret)?;

    let installation = webhook
        .installation
        .ok_or_else(|| WebhookError::Validation("no installation found in payload".to_string()))?;
    let changed = installation_service::process_installation(ctx.store(), &installation).await?;

    Ok(WebhookResponse::Message(format!(
        "installation {} processed: {changed} repositories updated",
        installation.id
    )))
}

async fn repository_event(
    ctx: &WebhookContext<'_>,
    raw: &RawWebhook,
    webhook: &Webhook,
    hook: &mut Hook,
) -> Result<WebhookResponse, WebhookError> {
    let incoming = webhook
        .repo
        .as_ref()
        .ok_or_else(|| WebhookError::Validation("no repository found in payload".to_string()))?;

    let current = repo_service::lookup_repository(ctx.store(), hook, incoming).await?;
    ctx.span.record("repo", current.full_name.as_str());
    ctx.verify(raw, &current.hash)?;
    if let Some(duplicate) = find_duplicate(ctx, &current, hook).await? {
        return Ok(duplicate);
    }

    let action = hook
        .event_action
        .map_or_else(|| "unknown".to_string(), |a| a.to_string());
    let reconciled = repo_service::reconcile(
        ctx.store(),
        hook,
        current,
        incoming,
        ctx.retry,
        &ctx.config().web_address,
    )
    .await?;
    ctx.span.record("hook", hook.number);

    Ok(match reconciled {
        Some(repo) => WebhookResponse::Repository(Box::new(repo)),
        None => WebhookResponse::Message(format!(
            "repository {action} event acknowledged: no changes"
        )),
    })
}

async fn build_event(
    ctx: &WebhookContext<'_>,
    raw: &RawWebhook,
    webhook: Webhook,
    hook: &mut Hook,
) -> Result<WebhookResponse, WebhookError> {
    let incoming = webhook
        .repo
        .as_ref()
        .ok_or_else(|| WebhookError::Validation("no repository found in payload".to_string()))?;

    let repo = match ctx.store().get_repository(&incoming.org, &incoming.name).await {
        Ok(repo) => repo,
        Err(StoreError::NotFound(_)) => {
            return Err(WebhookError::Validation(format!(
                "unable to get repo {}: not enrolled",
                incoming.full_name
            )))
        }
        Err(e) => return Err(e.into()),
    };
    ctx.span.record("repo", repo.full_name.as_str());
    ctx.verify(raw, &repo.hash)?;

    if let Some(duplicate) = find_duplicate(ctx, &repo, hook).await? {
        return Ok(duplicate);
    }

    hook_service::sequence_hook(ctx.store(), hook, &repo, ctx.retry).await?;
    ctx.span.record("hook", hook.number);

    if let Some(reason) = webhook.should_skip(ctx.config().skip_policy()) {
        tracing::info!(reason = %reason, "Build skipped");
        hook.fail(HookStatus::Skipped, reason.clone());
        return Ok(WebhookResponse::Message(reason));
    }

    let Some(mut draft) = webhook.build.clone() else {
        return Ok(WebhookResponse::Message(format!(
            "{} event: no build to process",
            hook.event
        )));
    };
    if hook.branch.is_empty() {
        hook.branch = draft.branch.clone();
    }

    admission_service::check_active(&repo)?;
    if let Err(e) = admission_service::check_event_allowed(&repo, &draft) {
        hook.fail(HookStatus::Skipped, e.to_string());
        return Err(e);
    }
    admission_service::check_build_limit(ctx.store(), &repo).await?;
    admission_service::complete_comment(ctx.scm(), &repo, &mut draft, &webhook.pull_request)
        .await?;
    // comment drafts only learn their branch from the pull request
    if hook.branch.is_empty() {
        hook.branch = draft.branch.clone();
    }
    admission_service::resolve_sender(ctx.scm(), &repo, &mut draft).await;

    let pipeline = match ctx.compiler().compile(&draft, &repo).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            crate::metrics::build_rejected("compile");
            hook.fail(
                HookStatus::Failure,
                format!("unable to compile pipeline for {}: {e}", repo.full_name),
            );
            draft.status = Some(BuildStatus::Error);
            draft.error = e.message.clone();
            admission_service::report_status(ctx.scm(), &repo, &Build::from_draft(&draft, repo.id))
                .await;
            return Err(e.into());
        }
    };

    if pipeline.steps.is_empty() {
        let reason = "skipping build: pipeline has no steps".to_string();
        hook.fail(HookStatus::Skipped, reason.clone());
        return Ok(WebhookResponse::Message(reason));
    }

    let gated =
        admission_service::needs_approval(ctx.scm(), &repo, &draft, &webhook.pull_request).await;
    let mut build = Build::from_draft(&draft, repo.id);
    build.fork = webhook.pull_request.is_from_fork;
    build.status = if gated {
        BuildStatus::PendingApproval
    } else {
        BuildStatus::Pending
    };

    let build = build_service::create_build(
        ctx.store(),
        build,
        &repo,
        &ctx.config().web_address,
        ctx.retry,
    )
    .await
    .map_err(|e| match e {
        StoreError::Conflict(msg) => WebhookError::Conflict(format!(
            "unable to create build for {}: {msg}",
            repo.full_name
        )),
        e => e.into(),
    })?;
    hook.build_id = Some(build.id);

    if build.event == EventType::Deployment {
        if let Some(deployment) = webhook.deployment.as_ref() {
            deployment_service::link_build(ctx.store(), &repo, deployment, &build).await?;
        }
    }

    admission_service::report_status(ctx.scm(), &repo, &build).await;

    let auto_cancel = pipeline
        .auto_cancel
        .filter(|opts| cancel_service::should_auto_cancel(Some(opts), &build, &repo.branch));

    if gated {
        tracing::info!(build = build.number, "Build awaiting approval");
        crate::metrics::build_admitted("gated");
    } else {
        crate::metrics::build_admitted("enqueued");
    }
    spawn_follow_up(ctx, &repo, &build, pipeline, auto_cancel, gated);

    Ok(WebhookResponse::Build(Box::new(build)))
}

/// Start the auto-cancel sweep and queue publication for an admitted build.
///
/// Runs on its own task so the response, or a client disconnect, does not
/// wait for or abort it. Gated builds are never published.
fn spawn_follow_up(
    ctx: &WebhookContext<'_>,
    repo: &Repository,
    build: &Build,
    pipeline: CompiledPipeline,
    auto_cancel: Option<AutoCancel>,
    gated: bool,
) {
    if auto_cancel.is_none() && gated {
        return;
    }

    let store = ctx.state.store.clone();
    let queue = ctx.state.queue.clone();
    let canceller = ctx.state.canceller.clone();
    let repo = repo.clone();
    let build = build.clone();

    let span = tracing::info_span!("build_follow_up", repo = %repo.full_name, build = build.number);
    span.follows_from(&ctx.span);

    ctx.state.background.spawn(span, async move {
        if let Some(opts) = auto_cancel {
            cancel_service::auto_cancel(store.as_ref(), canceller.as_ref(), &build, opts).await;
        }
        if !gated {
            let item = QueueItem {
                build,
                repo,
                pipeline,
            };
            publish_service::enqueue(store.as_ref(), queue.as_ref(), item).await;
        }
    });
}
