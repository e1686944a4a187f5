//! Periodic status polling.
//!
//! Each poll is one `get_status` round trip, which ends with a keep-alive, so
//! a long-running watch never starves the controller.

use apt_core::error::AptResult;
use apt_core::serial::SerialLink;
use apt_driver_thorlabs::{ControllerSession, StatusReport};
use std::time::Duration;
use tokio::time::Instant;

/// One status poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSample {
    /// Time since polling started
    pub elapsed: Duration,
    /// Decoded status
    pub report: StatusReport,
}

/// Poll `channel` every `interval`, handing each sample to `on_sample`.
///
/// Runs `samples` polls, or forever when `samples` is `None`. The first poll
/// happens immediately. Any session error ends the loop.
pub async fn watch_status<L, F>(
    session: &mut ControllerSession<L>,
    channel: u8,
    interval: Duration,
    samples: Option<usize>,
    mut on_sample: F,
) -> AptResult<usize>
where
    L: SerialLink,
    F: FnMut(&StatusSample),
{
    let started = Instant::now();
    let mut taken = 0usize;

    while samples.map_or(true, |limit| taken < limit) {
        if taken > 0 {
            tokio::time::sleep(interval).await;
        }
        let report = session.get_status_report(channel).await?;
        let sample = StatusSample {
            elapsed: started.elapsed(),
            report,
        };
        tracing::trace!(
            channel,
            position = report.position,
            velocity = report.velocity,
            "Status sample"
        );
        on_sample(&sample);
        taken += 1;
    }

    Ok(taken)
}

/// Collect `samples` status polls spaced by `interval`.
pub async fn poll_status<L: SerialLink>(
    session: &mut ControllerSession<L>,
    channel: u8,
    interval: Duration,
    samples: usize,
) -> AptResult<Vec<StatusSample>> {
    let mut out = Vec::with_capacity(samples);
    watch_status(session, channel, interval, Some(samples), |s| out.push(*s)).await?;
    Ok(out)
}
