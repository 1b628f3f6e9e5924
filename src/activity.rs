//! Append-only activity log
use super::types::TimeStamp;
use super::utils::{LOG_HRP, new_uuid_to_bech32};
use anyhow::Context;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::error;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    #[n(0)]
    Slot,
    #[n(1)]
    Policy,
    #[n(2)]
    Kasbon,
}

/// An entry before it is stamped with an id and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityEntry {
    pub user: String,
    pub action: String,
    pub details: String,
    pub activity_type: ActivityType,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ActivityLog {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub timestamp: TimeStamp<Utc>,
    #[n(2)]
    pub user: String,
    #[n(3)]
    pub action: String,
    #[n(4)]
    pub details: String,
    #[n(5)]
    pub activity_type: ActivityType,
}

pub trait ActivitySink: Send + Sync {
    fn append(&self, log: &ActivityLog) -> anyhow::Result<()>;
}

/// Activity stored in a sled tree. Keys are fresh uuid7 bytes, which sort by
/// creation time, so iteration is chronological.
#[derive(Clone)]
pub struct SledActivityLog {
    tree: sled::Tree,
}

#[derive(Clone, Default)]
pub struct InMemoryActivityLog {
    entries: Arc<Mutex<Vec<ActivityLog>>>,
}

impl ActivityEntry {
    pub fn new(
        user: impl Into<String>,
        action: impl Into<String>,
        details: impl Into<String>,
        activity_type: ActivityType,
    ) -> Self {
        Self {
            user: user.into(),
            action: action.into(),
            details: details.into(),
            activity_type,
        }
    }
}

impl ActivityLog {
    pub fn stamp(entry: ActivityEntry) -> anyhow::Result<Self> {
        Ok(Self {
            id: new_uuid_to_bech32(LOG_HRP)?,
            timestamp: TimeStamp::new(),
            user: entry.user,
            action: entry.action,
            details: entry.details,
            activity_type: entry.activity_type,
        })
    }
}

/// Append an entry without letting a failure escape. Failures go to the error log.
pub fn record(sink: &dyn ActivitySink, entry: ActivityEntry) -> bool {
    let result = ActivityLog::stamp(entry.clone()).and_then(|log| sink.append(&log));
    match result {
        Ok(()) => true,
        Err(err) => {
            error!(
                event_name = "kasbon.activity.append_failed",
                action = %entry.action,
                details = %entry.details,
                error = %err,
                "failed to append activity log entry"
            );
            false
        }
    }
}

impl SledActivityLog {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// Entries newest first.
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<ActivityLog>> {
        self.tree
            .iter()
            .rev()
            .take(limit)
            .map(|entry| {
                let (_, bytes) = entry?;
                minicbor::decode::<ActivityLog>(&bytes).context("failed to decode activity log")
            })
            .collect()
    }
}

impl ActivitySink for SledActivityLog {
    fn append(&self, log: &ActivityLog) -> anyhow::Result<()> {
        self.tree
            .insert(uuid7::uuid7().as_bytes(), minicbor::to_vec(log)?)?;
        Ok(())
    }
}

impl InMemoryActivityLog {
    pub fn entries(&self) -> Vec<ActivityLog> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ActivitySink for InMemoryActivityLog {
    fn append(&self, log: &ActivityLog) -> anyhow::Result<()> {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(log.clone()),
            Err(poisoned) => poisoned.into_inner().push(log.clone()),
        }
        Ok(())
    }
}
