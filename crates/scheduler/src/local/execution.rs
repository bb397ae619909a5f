use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::core::JobRunner;
use crate::backend::ActivityResult;
use crate::planner::Activity;

/// Run one activity with its retry budget; each attempt gets the full step timeout.
pub(super) async fn run_activity<R: JobRunner>(runner: &R, activity: &Activity) -> ActivityResult {
    let attempts = activity.retry_count + 1;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if attempt > 1 && !activity.retry_interval.is_zero() {
            sleep(activity.retry_interval).await;
        }
        debug!(activity = %activity.name, attempt, "starting attempt");

        match timeout(activity.timeout_per_step, runner.run(activity)).await {
            Ok(Ok(value)) => return ActivityResult::success(&activity.name, value),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!("timed out after {}s", activity.timeout_per_step.as_secs_f64())
            }
        }
        warn!(
            activity = %activity.name,
            attempt,
            attempts,
            error = %last_error,
            "attempt failed"
        );
    }

    ActivityResult::failure(&activity.name, last_error)
}
