//! Overflow detection with notification cooldown.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;

use crate::models::log::{ScalingEvent, ScalingTrigger};
use crate::persistence::ops_repo::OpsRepo;
use crate::Result;

/// Queue depth above which the fleet is considered overflowing.
const QUEUE_DEPTH_THRESHOLD: i64 = 5;
/// Fleet RAM utilisation above which the fleet is considered overflowing.
const UTILISATION_THRESHOLD: f64 = 0.85;

/// Watches queue depth and fleet utilisation, recording an overflow
/// event and firing the operator notification at most once per
/// cooldown window so sustained overload cannot storm the channel.
pub struct ScalingMonitor {
    cooldown: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl ScalingMonitor {
    /// Create a monitor with the configured cooldown.
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: Mutex::new(None),
        }
    }

    /// Evaluate thresholds and, when tripped and out of cooldown,
    /// persist a [`ScalingEvent`] and fire the notification side-effect.
    ///
    /// Returns the event written, or `None` when below thresholds or
    /// still cooling down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persisting the event fails.
    pub async fn check(
        &self,
        ops: &OpsRepo,
        queue_depth: i64,
        used_ram: i64,
        total_ram: i64,
    ) -> Result<Option<ScalingEvent>> {
        #[allow(clippy::cast_precision_loss)] // RAM totals fit in f64's mantissa.
        let utilisation = if total_ram > 0 {
            used_ram as f64 / total_ram as f64
        } else {
            0.0
        };

        let trigger = if queue_depth > QUEUE_DEPTH_THRESHOLD {
            ScalingTrigger::HighQueue
        } else if utilisation > UTILISATION_THRESHOLD {
            ScalingTrigger::HighLoad
        } else {
            return Ok(None);
        };

        {
            let mut last = self.last_fired.lock().await;
            if let Some(fired_at) = *last {
                if fired_at.elapsed() < self.cooldown {
                    return Ok(None);
                }
            }
            *last = Some(Instant::now());
        }

        let event = ScalingEvent::overflow(trigger, queue_depth, utilisation * 100.0);
        ops.insert_scaling_event(&event).await?;

        // Operator notification side-effect: a structured warning the
        // deployment's alerting picks up.
        warn!(
            trigger = trigger.as_str(),
            queue_depth,
            utilisation_pct = event.utilisation_pct,
            "fleet overflow detected, scaling needed"
        );
        Ok(Some(event))
    }
}
