//! User location stream built on a permission-gated position source.

use std::sync::Arc;

use chrono::TimeDelta;
use tokio::task::JoinHandle;

use crate::config::LocationOptions;
use crate::geo::distance_km;
use crate::model::{UserLocation, valid_latitude, valid_longitude};
use crate::ports::{Permission, PositionFix, PositionSource};

/// Decides which raw fixes are worth forwarding.
///
/// A fix passes when the minimum interval has elapsed since the last forwarded
/// fix or the user moved at least the minimum distance, whichever comes first.
#[derive(Debug, Clone)]
pub struct EmissionGate {
    min_interval: Option<TimeDelta>,
    min_distance_m: f64,
    last: Option<PositionFix>,
}

impl EmissionGate {
    /// Gate configured from `options`.
    #[must_use]
    pub fn new(options: &LocationOptions) -> Self {
        Self {
            min_interval: TimeDelta::from_std(options.min_interval).ok(),
            min_distance_m: options.min_distance_m,
            last: None,
        }
    }

    /// Whether `fix` should be forwarded; remembers it if so.
    pub fn admit(&mut self, fix: &PositionFix) -> bool {
        if !valid_latitude(fix.latitude) || !valid_longitude(fix.longitude) {
            return false;
        }

        let due = match &self.last {
            None => true,
            Some(last) => {
                let elapsed = fix.timestamp - last.timestamp;
                let moved_m = distance_km(
                    (last.latitude, last.longitude),
                    (fix.latitude, fix.longitude),
                ) * 1000.0;
                self.min_interval.is_some_and(|interval| elapsed >= interval)
                    || moved_m >= self.min_distance_m
            }
        };

        if due {
            self.last = Some(*fix);
        }
        due
    }
}

/// Live location subscription.
///
/// Dropping the subscription unsubscribes, so the background watch is released
/// on every exit path of its owner.
#[derive(Debug)]
pub struct LocationSubscription {
    task: Option<JoinHandle<()>>,
}

impl LocationSubscription {
    /// Stop forwarding updates and release the platform watch. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("location subscription released");
        }
    }

    /// Whether updates may still arrive.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Start streaming the user location into `on_update`.
///
/// When permission is denied the subscription ends without a single update.
/// Otherwise one immediate fix is forwarded, followed by gated watch updates.
/// Position errors are logged and end the stream quietly.
pub fn subscribe<F>(
    source: Arc<dyn PositionSource>,
    options: LocationOptions,
    on_update: F,
) -> LocationSubscription
where
    F: Fn(UserLocation) + Send + 'static,
{
    let task = tokio::spawn(stream_positions(source, options, on_update));
    LocationSubscription { task: Some(task) }
}

async fn stream_positions<F>(source: Arc<dyn PositionSource>, options: LocationOptions, on_update: F)
where
    F: Fn(UserLocation) + Send + 'static,
{
    if source.request_foreground_permission().await == Permission::Denied {
        tracing::info!("location permission denied, map continues without user position");
        return;
    }

    let mut gate = EmissionGate::new(&options);

    match source.current_position(options.accuracy).await {
        Ok(fix) => {
            if gate.admit(&fix) {
                tracing::debug!(lat = fix.latitude, lng = fix.longitude, "initial user position");
                on_update(fix.into());
            }
        }
        Err(err) => tracing::warn!(%err, "initial position unavailable"),
    }

    let mut fixes = match source.watch_position(&options).await {
        Ok(fixes) => fixes,
        Err(err) => {
            tracing::warn!(%err, "cannot watch position");
            return;
        }
    };

    while let Some(fix) = fixes.recv().await {
        if gate.admit(&fix) {
            on_update(fix.into());
        }
    }
    tracing::debug!("position watch ended");
}
