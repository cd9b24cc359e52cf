//! Last-written profile settings.
//!
//! The board cannot be read back, so the only record of what each profile
//! slot holds is what this process last wrote. The ledger keeps that record
//! and, when given a path, mirrors it to a JSON file after every write so it
//! survives restarts.

use anyhow::{Context, Result};
use dds_core::words::ProfileWords;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Physical values and words of one profile slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileSetting {
    /// Output frequency.
    pub frequency_hz: f64,
    /// Phase offset.
    pub phase_deg: f64,
    /// Amplitude scale.
    pub amplitude: f64,
    /// Quantized words sent to the board.
    pub words: ProfileWords,
}

/// Key-value record of profile settings, keyed `device/channel/profile`.
#[derive(Debug, Default)]
pub struct ProfileLedger {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, ProfileSetting>>,
}

fn key(device: &str, channel: u8, profile: u8) -> String {
    format!("{}/{}/{}", device, channel, profile)
}

impl ProfileLedger {
    /// Ledger that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Ledger backed by `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read profile ledger: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse profile ledger: {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened profile ledger");
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Last setting written to a slot.
    pub fn get(&self, device: &str, channel: u8, profile: u8) -> Option<ProfileSetting> {
        self.entries.lock().get(&key(device, channel, profile)).copied()
    }

    /// Snapshot of all entries.
    pub fn entries(&self) -> BTreeMap<String, ProfileSetting> {
        self.entries.lock().clone()
    }

    /// Record a successful write and persist.
    pub fn record(
        &self,
        device: &str,
        channel: u8,
        profile: u8,
        setting: ProfileSetting,
    ) -> Result<()> {
        self.record_all(device, channel, &[(profile, setting)])
    }

    /// Record several slots of one channel in a single save.
    ///
    /// The in-memory entries only change once the file has been written, so
    /// a failed save leaves memory and disk in agreement.
    pub fn record_all(
        &self,
        device: &str,
        channel: u8,
        settings: &[(u8, ProfileSetting)],
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        let mut updated = entries.clone();
        for (profile, setting) in settings {
            updated.insert(key(device, channel, *profile), *setting);
        }
        self.persist(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn persist(&self, entries: &BTreeMap<String, ProfileSetting>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)
            .with_context(|| format!("Failed to write profile ledger: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace profile ledger: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(frequency_hz: f64) -> ProfileSetting {
        ProfileSetting {
            frequency_hz,
            phase_deg: 0.0,
            amplitude: 1.0,
            words: ProfileWords {
                frequency: 1,
                phase: 0,
                amplitude: 0x3fff,
            },
        }
    }

    #[test]
    fn test_in_memory_record() {
        let ledger = ProfileLedger::in_memory();
        ledger.record("dds", 1, 0, setting(200e6)).unwrap();
        assert_eq!(ledger.get("dds", 1, 0), Some(setting(200e6)));
        assert_eq!(ledger.get("dds", 1, 1), None);
        assert!(ledger.path().is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");

        let ledger = ProfileLedger::open(&path).unwrap();
        ledger.record("dds", 0, 7, setting(80e6)).unwrap();
        drop(ledger);

        let reopened = ProfileLedger::open(&path).unwrap();
        assert_eq!(reopened.get("dds", 0, 7), Some(setting(80e6)));
        assert_eq!(reopened.entries().len(), 1);
    }

    #[test]
    fn test_failed_save_keeps_previous_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProfileLedger::open(dir.path().join("missing").join("profiles.json")).unwrap();

        let result = ledger.record_all("dds", 0, &[(0, setting(200e6)), (7, setting(200e6))]);

        assert!(result.is_err());
        assert!(ledger.entries().is_empty());
    }
}
