//! Test doubles for storage, time, sources and probing
//!
//! Used by the crate's own tests and by downstream crates that compose a
//! bootstrap without real storage or network.

use crate::clock::Clock;
use crate::probe::{ConnectivityProber, ProbeResult, PermissionLevel, NETWORK_ERROR};
use crate::sources::{RemoteSettingsStore, SourceReader, StaticConfigDocument, StaticFileFetcher};
use crate::storage::{KeyValueStore, MemoryStore};
use crate::types::{ConfigSource, Configuration, Credentials, SettingRow, SourceOutcome};
use crate::{BeaconError, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Virtual clock: `sleep` advances time instantly and is recorded
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::starting_at(start)
    }
}

impl ManualClock {
    /// Clock reading `start`
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }

    async fn sleep(&self, duration: Duration) {
        lock(&self.sleeps).push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Store where every operation fails, as with storage disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingStore;

impl KeyValueStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(BeaconError::storage("storage disabled"))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<()> {
        Err(BeaconError::storage("storage disabled"))
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Err(BeaconError::storage("storage disabled"))
    }
}

/// Memory store that counts writes per key prefix
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
    written_keys: Mutex<Vec<String>>,
}

impl CountingStore {
    /// Total `set` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// `set` calls against `key`
    pub fn writes_to(&self, key: &str) -> usize {
        lock(&self.written_keys).iter().filter(|k| *k == key).count()
    }
}

impl KeyValueStore for CountingStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        lock(&self.written_keys).push(key.to_string());
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key)
    }
}

/// Source reader returning a fixed outcome
#[derive(Debug)]
pub struct FixedReader {
    source: ConfigSource,
    outcome: SourceOutcome,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FixedReader {
    /// Reader for `source` returning `outcome`
    pub fn new(source: ConfigSource, outcome: SourceOutcome) -> Self {
        Self {
            source,
            outcome,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Reader that finds `config`
    pub fn found(source: ConfigSource, config: Configuration) -> Self {
        Self::new(source, SourceOutcome::found(config))
    }

    /// Wait (in real time) before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of reads
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for FixedReader {
    fn source(&self) -> ConfigSource {
        self.source
    }

    async fn read(&self) -> SourceOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

/// Prober with a fixed answer that records every configuration it sees
#[derive(Debug)]
pub struct RecordingProber {
    result: ProbeResult,
    calls: Mutex<Vec<Configuration>>,
}

impl RecordingProber {
    /// Prober answering `result`
    pub fn new(result: ProbeResult) -> Self {
        Self {
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every endpoint reachable
    pub fn reachable() -> Self {
        Self::new(ProbeResult::connected(PermissionLevel::Read))
    }

    /// Every endpoint fails with a network error
    pub fn unreachable() -> Self {
        Self::new(ProbeResult::failed(NETWORK_ERROR, "connection refused"))
    }

    /// Configurations probed so far
    pub fn calls(&self) -> Vec<Configuration> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ConnectivityProber for RecordingProber {
    async fn probe(&self, config: &Configuration) -> ProbeResult {
        lock(&self.calls).push(config.clone());
        self.result.clone()
    }
}

/// Static file fetcher replaying a script; errors once the script runs out
#[derive(Debug)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<std::result::Result<Option<StaticConfigDocument>, String>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    /// Fetcher replaying `script` in order
    pub fn new(script: Vec<std::result::Result<Option<StaticConfigDocument>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StaticFileFetcher for ScriptedFetcher {
    async fn fetch(&self) -> Result<Option<StaticConfigDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.script).pop_front() {
            Some(Ok(doc)) => Ok(doc),
            Some(Err(message)) => Err(BeaconError::other(message)),
            None => Err(BeaconError::other("network unreachable")),
        }
    }
}

/// Remote settings store returning fixed rows
#[derive(Debug)]
pub struct FixedSettingsStore {
    rows: Vec<SettingRow>,
    calls: AtomicUsize,
}

impl FixedSettingsStore {
    /// Store holding `rows`
    pub fn new(rows: Vec<SettingRow>) -> Self {
        Self {
            rows,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSettingsStore for FixedSettingsStore {
    async fn fetch_settings(
        &self,
        _credentials: &Credentials,
        keys: &[&str],
    ) -> Result<Vec<SettingRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .iter()
            .filter(|row| keys.contains(&row.key.as_str()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.sleep(Duration::from_secs(2)).await;
        assert_eq!(clock.now() - start, chrono::Duration::seconds(2));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_counting_store() {
        let store = CountingStore::default();
        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        store.set("b", "3").unwrap();
        assert_eq!(store.writes(), 3);
        assert_eq!(store.writes_to("a"), 2);
    }
}
