//! Refresh-problem detection.
//!
//! The Shortcut can crash before it sends anything (an Apple defect triggered
//! by alarms repeating on exactly one weekday), so a missing update is the
//! only symptom the bridge ever sees. The refresh status is therefore derived
//! from timestamps by a periodic freshness check instead of being pushed.

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

/// Marker sent by the Shortcut around a refresh run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RefreshPhase {
    Start,
    End,
}

/// Why a person is flagged with a refresh problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RefreshProblem {
    /// A refresh started but never delivered data.
    RefreshIncomplete,
    /// No data arrived within the silence interval.
    Stale,
}

/// Thresholds for the freshness check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    /// Maximum silence before the reading is stale; `None` disables the check.
    pub stale_after: Option<TimeDelta>,
    /// Time a started refresh may take before it counts as failed.
    pub grace: TimeDelta,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            stale_after: Some(TimeDelta::hours(26)),
            grace: TimeDelta::minutes(2),
        }
    }
}

/// Timestamps the refresh status is derived from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshInputs {
    pub last_event_time: Option<DateTime<FixedOffset>>,
    pub last_refresh_start: Option<DateTime<FixedOffset>>,
    pub last_refresh_end: Option<DateTime<FixedOffset>>,
}

impl RefreshPolicy {
    /// Evaluate the refresh status at `now`.
    pub fn evaluate(&self, inputs: &RefreshInputs, now: DateTime<Utc>) -> Option<RefreshProblem> {
        if let Some(start) = inputs.last_refresh_start {
            let completed = inputs.last_refresh_end.is_some_and(|end| end >= start);
            if !completed && now - start.with_timezone(&Utc) > self.grace {
                return Some(RefreshProblem::RefreshIncomplete);
            }
        }

        if let (Some(stale_after), Some(last_event)) = (self.stale_after, inputs.last_event_time)
            && now - last_event.with_timezone(&Utc) > stale_after
        {
            return Some(RefreshProblem::Stale);
        }

        None
    }
}

/// Spawn the periodic freshness check.
///
/// Each tick sends a unit message; the bridge loop evaluates every person and
/// republishes so relative attributes stay current. Stops when the receiver
/// is gone.
pub fn run_freshness_check(period: Duration, tx: mpsc::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[Refresh] Freshness check every {}s", period.as_secs());
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already evaluates.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    fn utc(text: &str) -> DateTime<Utc> {
        time(text).with_timezone(&Utc)
    }

    #[test]
    fn test_fresh_reading_has_no_problem() {
        let policy = RefreshPolicy::default();
        let inputs = RefreshInputs {
            last_event_time: Some(time("2025-09-17T18:00:00+00:00")),
            ..Default::default()
        };
        assert_eq!(policy.evaluate(&inputs, utc("2025-09-18T06:00:00+00:00")), None);
    }

    #[test]
    fn test_silence_interval_flips_to_stale() {
        let policy = RefreshPolicy {
            stale_after: Some(TimeDelta::hours(1)),
            ..Default::default()
        };
        let inputs = RefreshInputs {
            last_event_time: Some(time("2025-09-17T18:00:00+00:00")),
            ..Default::default()
        };
        assert_eq!(policy.evaluate(&inputs, utc("2025-09-17T19:00:00+00:00")), None);
        assert_eq!(
            policy.evaluate(&inputs, utc("2025-09-17T19:00:01+00:00")),
            Some(RefreshProblem::Stale)
        );

        let disabled = RefreshPolicy {
            stale_after: None,
            ..Default::default()
        };
        assert_eq!(disabled.evaluate(&inputs, utc("2026-01-01T00:00:00+00:00")), None);
    }

    #[test]
    fn test_started_refresh_without_data_is_incomplete() {
        let policy = RefreshPolicy::default();
        let mut inputs = RefreshInputs {
            last_event_time: Some(time("2025-09-17T18:00:00+00:00")),
            last_refresh_start: Some(time("2025-09-17T20:00:00+00:00")),
            last_refresh_end: Some(time("2025-09-17T18:00:00+00:00")),
        };
        assert_eq!(policy.evaluate(&inputs, utc("2025-09-17T20:01:00+00:00")), None);
        assert_eq!(
            policy.evaluate(&inputs, utc("2025-09-17T20:03:00+00:00")),
            Some(RefreshProblem::RefreshIncomplete)
        );

        inputs.last_refresh_end = Some(time("2025-09-17T20:00:30+00:00"));
        assert_eq!(policy.evaluate(&inputs, utc("2025-09-17T20:03:00+00:00")), None);
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!("start".parse::<RefreshPhase>().unwrap(), RefreshPhase::Start);
        assert_eq!("END".parse::<RefreshPhase>().unwrap(), RefreshPhase::End);
        assert!("middle".parse::<RefreshPhase>().is_err());
        assert_eq!(RefreshProblem::RefreshIncomplete.to_string(), "refresh_incomplete");
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_check_ticks() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = run_freshness_check(Duration::from_secs(60), tx);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(rx.recv().await, Some(()));
        handle.abort();
    }
}
