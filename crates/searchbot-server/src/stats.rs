use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub enum Counter {
    Searches,
    Uploads,
    Connections,
    Rejections,
    JobsRecorded,
    JobsNotified,
    JobsDropped,
}

/// Process-lifetime usage counters.
#[derive(Debug, Default)]
pub struct UsageStats {
    searches: AtomicU64,
    uploads: AtomicU64,
    connections: AtomicU64,
    rejections: AtomicU64,
    jobs_recorded: AtomicU64,
    jobs_notified: AtomicU64,
    jobs_dropped: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub searches: u64,
    pub uploads: u64,
    pub connections: u64,
    pub rejections: u64,
    pub jobs_recorded: u64,
    pub jobs_notified: u64,
    pub jobs_dropped: u64,
}

impl UsageStats {
    pub fn incr(&self, counter: Counter) {
        self.cell(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.cell(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            searches: self.get(Counter::Searches),
            uploads: self.get(Counter::Uploads),
            connections: self.get(Counter::Connections),
            rejections: self.get(Counter::Rejections),
            jobs_recorded: self.get(Counter::JobsRecorded),
            jobs_notified: self.get(Counter::JobsNotified),
            jobs_dropped: self.get(Counter::JobsDropped),
        }
    }

    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Searches => &self.searches,
            Counter::Uploads => &self.uploads,
            Counter::Connections => &self.connections,
            Counter::Rejections => &self.rejections,
            Counter::JobsRecorded => &self.jobs_recorded,
            Counter::JobsNotified => &self.jobs_notified,
            Counter::JobsDropped => &self.jobs_dropped,
        }
    }
}
