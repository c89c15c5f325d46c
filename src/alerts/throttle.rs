use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::db::{AlertStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Approved,
    Suppressed,
}

/// Per-device record of when the last alert was raised.
///
/// Each decision runs under the map's entry lock for that device, so the
/// read of `last_alert_at` and its update on approval are one step. Devices
/// hashing to different shards never contend. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct AlertThrottle {
    last_alert: Arc<DashMap<String, DateTime<Utc>>>,
}

impl AlertThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether an over-threshold reading at `now` may raise an alert.
    ///
    /// Approved when the device has no previous alert or at least `window`
    /// has passed since it. On approval `now` becomes the device's last
    /// alert time before this returns.
    ///
    /// Only call this for `Verdict::Exceeds`.
    pub fn admit(&self, device_id: &str, now: DateTime<Utc>, window: Duration) -> Admission {
        match self.last_alert.entry(device_id.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                Admission::Approved
            }
            Entry::Occupied(mut slot) => {
                if window_elapsed(*slot.get(), now, window) {
                    slot.insert(now);
                    Admission::Approved
                } else {
                    Admission::Suppressed
                }
            }
        }
    }

    /// Undo an approval whose alert could not be recorded, so the next
    /// reading for the device is not suppressed by an alert that never
    /// existed. No-op if another approval has replaced it since.
    pub fn release(&self, device_id: &str, approved_at: DateTime<Utc>) {
        self.last_alert
            .remove_if(device_id, |_, at| *at == approved_at);
    }

    pub fn last_alert_at(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.last_alert.get(device_id).map(|at| *at)
    }

    /// Record a historical alert time, keeping whichever is later.
    pub fn seed(&self, device_id: &str, at: DateTime<Utc>) {
        self.last_alert
            .entry(device_id.to_owned())
            .and_modify(|last| *last = (*last).max(at))
            .or_insert(at);
    }

    /// Seed the throttle from the alert history so a restart does not
    /// re-alert every device that is still above the threshold.
    pub async fn rebuild_from(&self, alerts: &dyn AlertStore) -> Result<usize, StoreError> {
        let history = alerts.last_alert_per_device().await?;
        let devices = history.len();
        for (device_id, at) in history {
            self.seed(&device_id, at);
        }
        info!(devices, "Alert throttle rebuilt from alert history");
        Ok(devices)
    }
}

/// True when `now - last >= window`. A clock that stepped backwards yields a
/// negative elapsed time, which counts as still inside the window.
fn window_elapsed(last: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    match (now - last).to_std() {
        Ok(elapsed) => elapsed >= window,
        Err(_) => {
            warn!(%last, %now, "Clock moved backwards; treating alert as inside throttle window");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeDelta;

    use super::*;
    use crate::db::{
        models::{AlertKind, NewAlert},
        MemoryStore,
    };

    const WINDOW: Duration = Duration::from_secs(120);

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(secs)
    }

    #[test]
    fn first_alert_for_a_device_is_approved() {
        let throttle = AlertThrottle::new();
        assert_eq!(throttle.admit("d1", at(0), WINDOW), Admission::Approved);
        assert_eq!(throttle.last_alert_at("d1"), Some(at(0)));
    }

    #[test]
    fn repeat_inside_window_is_suppressed() {
        let throttle = AlertThrottle::new();
        assert_eq!(throttle.admit("d1", at(0), WINDOW), Admission::Approved);
        assert_eq!(throttle.admit("d1", at(119), WINDOW), Admission::Suppressed);
        // Suppression does not move the window.
        assert_eq!(throttle.last_alert_at("d1"), Some(at(0)));
    }

    #[test]
    fn repeat_after_window_is_approved() {
        let throttle = AlertThrottle::new();
        assert_eq!(throttle.admit("d1", at(0), WINDOW), Admission::Approved);
        assert_eq!(throttle.admit("d1", at(121), WINDOW), Admission::Approved);
        assert_eq!(throttle.last_alert_at("d1"), Some(at(121)));
    }

    #[test]
    fn exactly_one_window_later_is_approved() {
        let throttle = AlertThrottle::new();
        throttle.admit("d1", at(0), WINDOW);
        assert_eq!(throttle.admit("d1", at(120), WINDOW), Admission::Approved);
    }

    #[test]
    fn backwards_clock_is_suppressed() {
        let throttle = AlertThrottle::new();
        throttle.admit("d1", at(500), WINDOW);
        assert_eq!(throttle.admit("d1", at(0), WINDOW), Admission::Suppressed);
    }

    #[test]
    fn devices_are_independent() {
        let throttle = AlertThrottle::new();
        assert_eq!(throttle.admit("a", at(0), WINDOW), Admission::Approved);
        for s in 0..10 {
            throttle.admit("b", at(s * 30), WINDOW);
        }
        assert_eq!(throttle.admit("a", at(60), WINDOW), Admission::Suppressed);
        assert_eq!(throttle.admit("a", at(120), WINDOW), Admission::Approved);
    }

    #[test]
    fn release_reopens_the_window_only_for_the_same_approval() {
        let throttle = AlertThrottle::new();
        throttle.admit("d1", at(0), WINDOW);
        throttle.release("d1", at(0));
        assert_eq!(throttle.last_alert_at("d1"), None);
        assert_eq!(throttle.admit("d1", at(5), WINDOW), Admission::Approved);

        // A stale release must not clear a newer approval.
        throttle.release("d1", at(0));
        assert_eq!(throttle.last_alert_at("d1"), Some(at(5)));
    }

    #[test]
    fn seed_keeps_the_latest_time() {
        let throttle = AlertThrottle::new();
        throttle.seed("d1", at(100));
        throttle.seed("d1", at(50));
        assert_eq!(throttle.last_alert_at("d1"), Some(at(100)));
        assert_eq!(throttle.admit("d1", at(150), WINDOW), Admission::Suppressed);
    }

    #[tokio::test]
    async fn rebuild_seeds_from_alert_history() {
        let store = MemoryStore::new();
        store
            .save_alert(NewAlert {
                device_id: "d1".to_owned(),
                kind: AlertKind::GasLeak,
                gas_value: 80.0,
                message: "High LPG level detected: 80".to_owned(),
                created_at: at(0),
            })
            .await
            .unwrap();

        let throttle = AlertThrottle::new();
        assert_eq!(throttle.rebuild_from(&store).await.unwrap(), 1);
        assert_eq!(throttle.admit("d1", at(30), WINDOW), Admission::Suppressed);
        assert_eq!(throttle.admit("d2", at(30), WINDOW), Admission::Approved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_exceeds_for_one_device_approve_exactly_once() {
        for n in [1usize, 2, 16, 64] {
            let throttle = AlertThrottle::new();
            let approved = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(tokio::sync::Barrier::new(n));

            let handles: Vec<_> = (0..n)
                .map(|i| {
                    let throttle = throttle.clone();
                    let approved = approved.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        // Every caller is within the window of the others.
                        let now = at((i % 60) as i64);
                        if throttle.admit("d1", now, WINDOW) == Admission::Approved {
                            approved.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for h in handles {
                h.await.unwrap();
            }
            assert_eq!(approved.load(Ordering::SeqCst), 1, "n = {n}");
        }
    }
}
