//! Runtime counters, dumped as one JSON object on SIGUSR1 and at shutdown.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::wm::xconn::EventKind;

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub events_seen: [u64; EventKind::COUNT],
    pub events_coalesced: [u64; EventKind::COUNT],
    pub replies_retired: u64,
    pub replies_timed_out: u64,
    pub restacks: u64,
    pub x_flushes: u64,
    pub clients_managed: u64,
    pub clients_unmanaged: u64,
    pub late_probes: u64,
    pub ticks: u64,
    tick_min: Option<Duration>,
    tick_max: Duration,
    tick_sum: Duration,
}

#[derive(Debug, Serialize)]
struct TickSummary {
    count: u64,
    min_us: u128,
    max_us: u128,
    avg_us: u128,
}

impl Stats {
    pub fn seen(&mut self, kind: EventKind) {
        self.events_seen[kind as usize] += 1;
    }

    pub fn coalesced(&mut self, kind: EventKind) {
        self.events_coalesced[kind as usize] += 1;
    }

    pub fn record_tick(&mut self, duration: Duration) {
        self.ticks += 1;
        self.tick_min = Some(self.tick_min.map_or(duration, |min| min.min(duration)));
        self.tick_max = self.tick_max.max(duration);
        self.tick_sum += duration;
    }

    fn tick_summary(&self) -> TickSummary {
        let avg = if self.ticks == 0 { 0 } else { self.tick_sum.as_micros() / self.ticks as u128 };
        TickSummary {
            count: self.ticks,
            min_us: self.tick_min.unwrap_or_default().as_micros(),
            max_us: self.tick_max.as_micros(),
            avg_us: avg,
        }
    }

    pub fn to_json(&self) -> Value {
        let per_kind = |counts: &[u64; EventKind::COUNT]| {
            EventKind::ALL
                .iter()
                .filter(|kind| counts[**kind as usize] > 0)
                .map(|kind| (kind.name().to_string(), Value::from(counts[*kind as usize])))
                .collect::<Map<String, Value>>()
        };
        json!({
            "events_seen": per_kind(&self.events_seen),
            "events_coalesced": per_kind(&self.events_coalesced),
            "replies_retired": self.replies_retired,
            "replies_timed_out": self.replies_timed_out,
            "restacks": self.restacks,
            "x_flushes": self.x_flushes,
            "clients_managed": self.clients_managed,
            "clients_unmanaged": self.clients_unmanaged,
            "late_probes": self.late_probes,
            "ticks": self.tick_summary(),
        })
    }

    pub fn dump(&self) {
        info!("stats {}", self.to_json());
    }
}
