//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Spacecraft event time estimation for downlinked payloads."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! SCET estimation without time sync. Within one PMCC receipt time the
//! newest rover timestamp is taken to have left the rover exactly one
//! downlink delay before receipt; every older payload is offset backwards
//! from it by the difference in rover time.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use iris_gds_codec::{Payload, PayloadCollection};

use iris_gds_common::time::to_chrono;

/// SCET estimator over one batch of payloads.
#[derive(Debug, Clone)]
pub struct RoverTimeEstimator {
    now: DateTime<Utc>,
    delay_est: Duration,
    max_timestamp: HashMap<DateTime<Utc>, u32>,
}

fn pmcc_rx_or(payload: &Payload, now: DateTime<Utc>) -> DateTime<Utc> {
    payload
        .downlink_times()
        .and_then(|times| times.pmcc_rx)
        .unwrap_or(now)
}

impl RoverTimeEstimator {
    /// Estimator for `payloads`. Payloads without a PMCC receipt time are
    /// treated as received at `now`.
    pub fn new(payloads: &PayloadCollection, now: DateTime<Utc>, delay_est: Duration) -> Self {
        let mut max_timestamp: HashMap<DateTime<Utc>, u32> = HashMap::new();
        for payload in payloads.iter() {
            let Some(timestamp) = payload.timestamp() else {
                continue;
            };
            let slot = max_timestamp.entry(pmcc_rx_or(payload, now)).or_insert(timestamp);
            *slot = (*slot).max(timestamp);
        }
        Self {
            now,
            delay_est,
            max_timestamp,
        }
    }

    /// Downlink delay the estimates assume.
    pub fn delay_est(&self) -> Duration {
        self.delay_est
    }

    /// Newest rover timestamp seen for `pmcc_rx`.
    pub fn max_timestamp_for(&self, pmcc_rx: DateTime<Utc>) -> Option<u32> {
        self.max_timestamp.get(&pmcc_rx).copied()
    }

    /// Estimated SCET of `payload`, which must belong to the batch the
    /// estimator was built from.
    pub fn estimate(&self, payload: &Payload) -> DateTime<Utc> {
        let pmcc_rx = pmcc_rx_or(payload, self.now);
        let base = pmcc_rx - to_chrono(self.delay_est);
        match payload.timestamp() {
            None | Some(0) => base,
            Some(timestamp) => {
                let newest = self.max_timestamp_for(pmcc_rx).unwrap_or(timestamp);
                let offset_ms = i64::from(newest.saturating_sub(timestamp));
                base - chrono::Duration::milliseconds(offset_ms)
            }
        }
    }

    /// Write `scet_est` and `scet_dl_delay_est` into every downlinked
    /// payload. The i-th payload gets i extra microseconds so estimates
    /// within the batch are unique.
    pub fn stamp(&self, payloads: &mut PayloadCollection) {
        let mut index = 0i64;
        for payload in payloads.iter_mut() {
            if matches!(payload, Payload::Command(_)) {
                continue;
            }
            let scet = self.estimate(payload) + chrono::Duration::microseconds(index);
            index += 1;
            if let Some(times) = payload.downlink_times_mut() {
                times.scet_est = Some(scet);
                times.scet_dl_delay_est = Some(self.delay_est);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use iris_gds_codec::{DownlinkTimes, TelemetryPayload, Value};

    fn at(pmcc_rx: DateTime<Utc>, timestamp: u32) -> Payload {
        let mut payload = TelemetryPayload::new(0x4A00, 1, Value::UInt(1), timestamp);
        payload.downlink_times = Some(DownlinkTimes::received_at(pmcc_rx));
        payload.into()
    }

    fn scet(payload: &Payload) -> DateTime<Utc> {
        payload
            .downlink_times()
            .and_then(|t| t.scet_est)
            .expect("scet stamped")
    }

    #[test]
    fn newest_timestamp_anchors_each_receipt_time() {
        let t = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        let later = t + chrono::Duration::seconds(5);
        let payloads: PayloadCollection =
            vec![at(t, 100), at(later, 900), at(t, 500), at(later, 1000)].into();
        let estimator = RoverTimeEstimator::new(&payloads, t, Duration::from_millis(22_100));
        assert_eq!(estimator.max_timestamp_for(t), Some(500));
        assert_eq!(estimator.max_timestamp_for(later), Some(1000));

        let delay = chrono::Duration::milliseconds(22_100);
        let items: Vec<&Payload> = payloads.iter().collect();
        assert_eq!(estimator.estimate(items[0]), t - delay - chrono::Duration::milliseconds(400));
        assert_eq!(estimator.estimate(items[1]), later - delay - chrono::Duration::milliseconds(100));
        assert_eq!(estimator.estimate(items[3]), later - delay);
    }

    #[test]
    fn missing_timestamps_and_receipt_times_fall_back() {
        let now = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        let bare: Payload = TelemetryPayload::new(0x4A00, 1, Value::UInt(1), 0).into();
        let payloads: PayloadCollection = vec![bare].into();
        let estimator = RoverTimeEstimator::new(&payloads, now, Duration::from_secs(1));
        let mut payloads = payloads;
        estimator.stamp(&mut payloads);
        let stamped = payloads.iter().next().expect("one payload");
        assert_eq!(scet(stamped), now - chrono::Duration::seconds(1));
        assert_eq!(
            stamped.downlink_times().and_then(|t| t.scet_dl_delay_est),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn stamps_are_strictly_increasing_for_increasing_timestamps() {
        let t = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        let mut payloads: PayloadCollection = (0..20).map(|i| at(t, 10 + i)).collect();
        RoverTimeEstimator::new(&payloads, t, Duration::from_millis(22_100)).stamp(&mut payloads);
        let stamps: Vec<_> = payloads.iter().map(scet).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }
}
