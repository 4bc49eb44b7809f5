//! Effect application: delays and response replacement.

use crate::config::Effect;
use crate::duration::HumanDuration;
use crate::random::RandProvider;
use crate::response::ResponseSink;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Suspends the current request for a while.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleep on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested sleeps without waiting.
///
/// Useful for dry runs and tests that assert on the delay that would have
/// been applied.
#[derive(Debug, Default)]
pub struct MeasuringSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl MeasuringSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all requested sleeps.
    pub fn cumulative(&self) -> Duration {
        self.calls().iter().sum()
    }

    /// Every requested sleep, in call order.
    pub fn calls(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for MeasuringSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(duration);
    }
}

/// What applying an effect did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Applied {
    /// Delay that was slept, zero if none
    pub delay: Duration,
    /// Whether the response was written in full
    pub replaced: bool,
}

/// Apply `effect` to `response`.
///
/// Sleeps first if a delay is configured. With a replacement, headers are
/// set, then the body written, then the status committed; the sink is left
/// untouched otherwise.
pub async fn apply<S: ResponseSink>(
    effect: &Effect,
    response: &mut S,
    rand: &dyn RandProvider,
    sleeper: &dyn Sleeper,
) -> Result<Applied, S::Error> {
    let mut applied = Applied::default();

    if let Some(range) = &effect.delay {
        applied.delay = rand.duration(range.min, range.max);
        debug!(delay = %HumanDuration(applied.delay), "Applying delay");
        sleeper.sleep(applied.delay).await;
    }

    if let Some(replace) = &effect.replace {
        for (name, value) in &replace.headers {
            response.set_header(name.as_str(), value)?;
        }
        if let Some(body) = &replace.body {
            response.write_body(body.as_bytes())?;
        }
        response.write_status(replace.status_code)?;
        debug!(status = %replace.status_code, "Response replaced");
        applied.replaced = true;
    }

    Ok(applied)
}
