use std::time::Duration;

use async_trait::async_trait;
use binmap_core::{
    Accuracy, ConfigError, LocationError, LocationOptions, Permission, PositionFix, PositionSource,
    model::{valid_latitude, valid_longitude},
};
use chrono::Utc;
use tokio::sync::mpsc;

const POSITION_VAR: &str = "BINMAP_POSITION";

// Ticks land slightly after the interval so the emission gate never sees a
// stationary fix as early.
const TICK_SLACK: Duration = Duration::from_millis(50);

/// Position source reporting a fixed location taken from the environment.
///
/// Without a configured position the permission request is denied.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FixedPosition {
    coordinates: Option<(f64, f64)>,
}

impl FixedPosition {
    pub(crate) fn from_env() -> Result<Self, ConfigError> {
        Self::from_value(std::env::var(POSITION_VAR).ok().as_deref())
    }

    fn from_value(raw: Option<&str>) -> Result<Self, ConfigError> {
        let coordinates = match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
            None => None,
            Some(raw) => Some(parse_position(raw).ok_or_else(|| ConfigError::Invalid {
                key: POSITION_VAR,
                value: raw.to_owned(),
            })?),
        };
        Ok(Self { coordinates })
    }

    fn fix(&self, accuracy: Accuracy) -> Result<PositionFix, LocationError> {
        let (latitude, longitude) = self
            .coordinates
            .ok_or_else(|| LocationError::Unavailable(format!("{POSITION_VAR} is not set")))?;
        Ok(PositionFix {
            latitude,
            longitude,
            accuracy: Some(accuracy_m(accuracy)),
            timestamp: Utc::now(),
        })
    }
}

fn accuracy_m(accuracy: Accuracy) -> f64 {
    match accuracy {
        Accuracy::Low => 100.0,
        Accuracy::Balanced => 20.0,
        Accuracy::High => 5.0,
    }
}

fn watch_period(min_interval: Duration) -> Duration {
    min_interval.max(Duration::from_millis(1)) + TICK_SLACK
}

/// Parse `"lat,lng"` into valid coordinates.
fn parse_position(raw: &str) -> Option<(f64, f64)> {
    let (lat, lng) = raw.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lng: f64 = lng.trim().parse().ok()?;
    (valid_latitude(lat) && valid_longitude(lng)).then_some((lat, lng))
}

#[async_trait]
impl PositionSource for FixedPosition {
    async fn request_foreground_permission(&self) -> Permission {
        if self.coordinates.is_some() {
            Permission::Granted
        } else {
            Permission::Denied
        }
    }

    async fn current_position(&self, accuracy: Accuracy) -> Result<PositionFix, LocationError> {
        self.fix(accuracy)
    }

    async fn watch_position(
        &self,
        options: &LocationOptions,
    ) -> Result<mpsc::Receiver<PositionFix>, LocationError> {
        // Fail before spawning when no position is configured.
        self.fix(options.accuracy)?;

        let (tx, rx) = mpsc::channel(4);
        let source = *self;
        let accuracy = options.accuracy;
        let mut ticks = tokio::time::interval(watch_period(options.min_interval));
        tokio::spawn(async move {
            loop {
                ticks.tick().await;
                let Ok(fix) = source.fix(accuracy) else {
                    break;
                };
                if tx.send(fix).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}
