//! Session starter: pushes `start_session` to workers for fresh
//! placements.
//!
//! The scheduler is I/O-free by design, so placements only write rows;
//! this task watches for assignments that have not been started on
//! their worker yet (including rebinds after migration, which clear the
//! acknowledgement) and drives the worker call, reporting credential
//! rejections back as session failures.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::models::event::SessionFailureKind;
use crate::scheduler::Scheduler;
use crate::AppError;

use super::{resolve_client, PipelineContext};

const START_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn the starter loop.
#[must_use]
pub fn spawn_session_starter(
    ctx: Arc<PipelineContext>,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("session starter cancelled");
                    return;
                }
                () = tokio::time::sleep(START_SCAN_INTERVAL) => {}
            }

            let waiting = match ctx.assignments.list_awaiting_start().await {
                Ok(waiting) => waiting,
                Err(err) => {
                    error!(%err, "awaiting-start scan failed");
                    continue;
                }
            };

            for assignment in waiting {
                if let Err(err) = start_one(&ctx, &scheduler, &assignment.session_id).await {
                    warn!(%err, session_id = %assignment.session_id, "session start attempt failed");
                } else {
                    let _ = ctx.assignments.mark_started(&assignment.id).await;
                }
            }
        }
    })
}

/// Push one start to the session's worker; auth rejections crash the
/// session through the scheduler.
async fn start_one(
    ctx: &PipelineContext,
    scheduler: &Scheduler,
    session_id: &str,
) -> crate::Result<()> {
    let session = ctx
        .sessions
        .get_by_id(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
    let (client, _) = resolve_client(ctx, session_id).await?;

    match tokio::time::timeout(
        ctx.config.platform_timeout(),
        client.start_session(session_id, Bytes::from(session.auth_blob)),
    )
    .await
    {
        Ok(Ok(())) => {
            info!(session_id, "session started on worker");
            Ok(())
        }
        Ok(Err(AppError::PlatformPermanent(details))) => {
            warn!(session_id, details, "platform rejected session credentials");
            scheduler
                .session_failure(session_id, SessionFailureKind::Auth, &details)
                .await?;
            // Handled: the starter must not also mark it started.
            Err(AppError::PlatformPermanent(details))
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(AppError::PlatformTransient("start deadline exceeded".into())),
    }
}
