//! Bounded notification history per observed path
//!
//! A view over notifications that have already been delivered. Nothing in the
//! engine depends on it; listeners use it to show what changed between two
//! notifications and how often they arrive.

use chrono::TimeDelta;
use std::collections::{BTreeMap, HashMap, VecDeque};

use super::message::Notification;
use super::path::Path;
use super::value::Value;

pub const DEFAULT_HISTORY: usize = 10;

/// `(old, new)` value of a path that differs from the previous notification
pub type Change = (Option<Value>, Value);

#[derive(Debug)]
pub struct NotificationsTracker {
    depth: usize,
    history: HashMap<(String, Path), VecDeque<Notification>>,
}

impl Default for NotificationsTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl NotificationsTracker {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            history: HashMap::new(),
        }
    }

    fn key(notification: &Notification) -> (String, Path) {
        (notification.ep.clone(), notification.req_path.clone())
    }

    pub fn add(&mut self, notification: Notification) {
        let depth = self.depth;
        let entries = self.history.entry(Self::key(&notification)).or_default();
        if entries.len() == depth {
            entries.pop_front();
        }
        entries.push_back(notification);
    }

    pub fn history(&self, ep: &str, req_path: &Path) -> Vec<&Notification> {
        self.history
            .get(&(ep.to_string(), req_path.clone()))
            .map(|entries| entries.iter().collect())
            .unwrap_or_default()
    }

    /// Values in `notification` that differ from the last tracked one
    ///
    /// Empty when nothing is tracked yet or when `notification` is the last
    /// tracked entry itself.
    pub fn changes(&self, notification: &Notification) -> BTreeMap<Path, Change> {
        let mut changes = BTreeMap::new();
        let Some(previous) = self
            .history
            .get(&Self::key(notification))
            .and_then(|entries| entries.back())
        else {
            return changes;
        };
        if previous == notification && previous.timestamp == notification.timestamp {
            return changes;
        }
        for (path, value) in &notification.data {
            let old = previous.data.get(path);
            if old != Some(value) {
                changes.insert(path.clone(), (old.cloned(), value.clone()));
            }
        }
        changes
    }

    /// Time between consecutive notifications, ending with `notification`
    ///
    /// If `notification` is already tracked it is moved to the end instead of
    /// being counted twice. Empty when nothing is tracked yet.
    pub fn timedelta(&self, notification: &Notification) -> Vec<TimeDelta> {
        let Some(entries) = self.history.get(&Self::key(notification)) else {
            return Vec::new();
        };
        let mut timeline: Vec<&Notification> = entries
            .iter()
            .filter(|n| !(*n == notification && n.timestamp == notification.timestamp))
            .collect();
        timeline.push(notification);
        timeline
            .windows(2)
            .map(|pair| pair[1].timestamp - pair[0].timestamp)
            .collect()
    }
}
