//! Outbound dispatch with tracker bookkeeping and bounded retries.
//!
//! The tracker row is inserted before the network send: its unique key
//! is the at-most-once guard, and a transient failure leaves the row
//! (with a null forwarded id) so a retry storm can never produce a
//! second copy. Only a permanent failure deletes the row, re-opening
//! the source id for a deliberate later attempt.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::models::event::InboundMessage;
use crate::models::log::{ForwardingLog, LogStatus};
use crate::models::mapping::Mapping;
use crate::models::tracker::TrackerRow;
use crate::persistence::retry::{with_busy_retry, DEFAULT_STORE_RETRIES};
use crate::{AppError, Result};

use super::{elapsed_ms, resolve_client, truncate, PipelineContext};

/// What a dispatch attempt concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Message delivered; tracker row completed.
    Sent {
        /// Platform id of the forwarded copy.
        forwarded_msg_id: i64,
    },
    /// The tracker row already existed; nothing was sent.
    Duplicate,
    /// Retries exhausted on transient failures; tracker row kept with a
    /// null forwarded id.
    TransientExhausted,
    /// Permanent failure; tracker row deleted.
    PermanentFailed,
    /// Destination missing or inactive; nothing was attempted.
    Skipped,
}

/// SHA-256 hex digest of rendered content, for edit change detection.
#[must_use]
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Dispatch one rendered message for one mapping.
///
/// # Errors
///
/// Returns `AppError::Db` on store failures; platform failures are
/// classified into the returned [`DispatchOutcome`], not errors.
pub async fn forward_message(
    ctx: &PipelineContext,
    session_id: &str,
    mapping: &Mapping,
    msg: &InboundMessage,
    rendered: &str,
    started: std::time::Instant,
) -> Result<DispatchOutcome> {
    let Some(destination) = ctx.destinations.get_by_id(&mapping.destination_id).await? else {
        let mut log = ForwardingLog::for_mapping(&mapping.id, msg.kind, LogStatus::Error);
        log.error = Some("destination missing".to_owned());
        ctx.append_log(log).await;
        return Ok(DispatchOutcome::Skipped);
    };
    if !destination.active {
        return Ok(DispatchOutcome::Skipped);
    }

    // At-most-once guard: claim the (mapping, source) key first.
    let tracker = TrackerRow::new(
        mapping.id.clone(),
        msg.source_chat_id,
        msg.message_id,
        destination.chat_id,
    );
    match with_busy_retry(DEFAULT_STORE_RETRIES, || ctx.trackers.insert(&tracker)).await {
        Ok(()) => {}
        Err(AppError::Conflict(_)) => {
            let mut log = ForwardingLog::for_mapping(&mapping.id, msg.kind, LogStatus::Success);
            log.source_id = Some(mapping.source_id.clone());
            log.destination_id = Some(mapping.destination_id.clone());
            log.filter_reason = Some("duplicate".to_owned());
            log.processing_ms = elapsed_ms(started);
            ctx.append_log(log).await;
            info!(mapping_id = %mapping.id, source_msg_id = msg.message_id, "duplicate suppressed");
            return Ok(DispatchOutcome::Duplicate);
        }
        Err(err) => return Err(err),
    }

    let (client, _) = match resolve_client(ctx, session_id).await {
        Ok(resolved) => resolved,
        Err(err) => {
            // No worker to dispatch through: treat as transient, keep
            // the tracker row for the post-migration retry.
            warn!(%err, session_id, "dispatch deferred, no reachable worker");
            return Ok(DispatchOutcome::TransientExhausted);
        }
    };

    let retry_max = ctx.config.pipeline.default_retry_max;
    let deadline = ctx.config.platform_timeout();
    let mut backoff = Backoff::for_dispatch();
    let mut attempt = 0u32;

    loop {
        let send = client.send(destination.chat_id, rendered);
        let result = match tokio::time::timeout(deadline, send).await {
            Ok(result) => result,
            Err(_) => Err(AppError::PlatformTransient("send deadline exceeded".into())),
        };

        match result {
            Ok(receipt) => {
                let hash = content_hash(rendered);
                ctx.trackers
                    .set_forwarded(&tracker.id, receipt.forwarded_msg_id, Some(&hash))
                    .await?;

                let mut log = ForwardingLog::for_mapping(&mapping.id, msg.kind, LogStatus::Success);
                log.source_id = Some(mapping.source_id.clone());
                log.destination_id = Some(mapping.destination_id.clone());
                log.original_text = Some(truncate(&msg.text));
                log.processed_text = Some(truncate(rendered));
                log.processing_ms = elapsed_ms(started);
                ctx.append_log(log).await;

                info!(
                    mapping_id = %mapping.id,
                    forwarded_msg_id = receipt.forwarded_msg_id,
                    "message forwarded"
                );
                return Ok(DispatchOutcome::Sent {
                    forwarded_msg_id: receipt.forwarded_msg_id,
                });
            }
            Err(err) if err.is_transient() => {
                attempt += 1;
                if attempt > retry_max {
                    let mut log =
                        ForwardingLog::for_mapping(&mapping.id, msg.kind, LogStatus::Error);
                    log.source_id = Some(mapping.source_id.clone());
                    log.destination_id = Some(mapping.destination_id.clone());
                    log.error = Some(format!("transient failures exhausted {retry_max} retries: {err}"));
                    log.processing_ms = elapsed_ms(started);
                    ctx.append_log(log).await;
                    return Ok(DispatchOutcome::TransientExhausted);
                }
                let delay = backoff.next_delay();
                warn!(%err, attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "transient send failure, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                // Permanent: free the key so the user can retry later.
                ctx.trackers.delete(&tracker.id).await?;
                let mut log = ForwardingLog::for_mapping(&mapping.id, msg.kind, LogStatus::Error);
                log.source_id = Some(mapping.source_id.clone());
                log.destination_id = Some(mapping.destination_id.clone());
                log.error = Some(err.to_string());
                log.processing_ms = elapsed_ms(started);
                ctx.append_log(log).await;
                return Ok(DispatchOutcome::PermanentFailed);
            }
        }
    }
}
