//! Daily backup scheduling

use chrono::{Duration, NaiveDateTime, NaiveTime};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Next occurrence of `hour:minute` strictly after `now`.
///
/// If that time has already passed today the run rolls to tomorrow.
pub fn next_run_after(now: NaiveDateTime, hour: u32, minute: u32) -> NaiveDateTime {
    let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date().and_time(time);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Run `job` every day at `hour:minute` local time until `cancel` fires.
///
/// The sleep until the next run is interrupted by cancellation; a job that
/// has already started runs to completion.
pub async fn run_daily<F, Fut>(hour: u32, minute: u32, cancel: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = chrono::Local::now().naive_local();
        let next = next_run_after(now, hour, minute);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "next scheduled backup");

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("backup scheduler stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        job().await;
    }
}
