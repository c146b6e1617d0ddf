// src/license.rs
//! Time-limited license tiers stored in a small JSON file.
//!
//! The machine code written alongside a license is taken from a network
//! interface MAC address. Nothing verifies it; it only identifies the install.

use std::{
    fmt, fs, io,
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sysinfo::Networks;
use thiserror::Error;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
    Trial,
    Basic,
    Standard,
    Pro,
    Premium,
    Lifetime,
    Test,
}

impl Tier {
    pub const ALL: [Tier; 7] = [
        Tier::Trial,
        Tier::Basic,
        Tier::Standard,
        Tier::Pro,
        Tier::Premium,
        Tier::Lifetime,
        Tier::Test,
    ];

    /// The activation key / stored label of the tier.
    pub fn label(self) -> &'static str {
        match self {
            Tier::Trial => "Trial",
            Tier::Basic => "Basic",
            Tier::Standard => "Standard",
            Tier::Pro => "Pro",
            Tier::Premium => "Premium",
            Tier::Lifetime => "VIP Vinh Vien",
            Tier::Test => "test",
        }
    }

    pub fn from_label(label: &str) -> Option<Tier> {
        Tier::ALL.into_iter().find(|tier| tier.label() == label)
    }

    /// `None` for lifetime licenses.
    pub fn duration(self) -> Option<TimeDelta> {
        match self {
            Tier::Trial => Some(TimeDelta::days(30)),
            Tier::Basic => Some(TimeDelta::days(90)),
            Tier::Standard => Some(TimeDelta::days(180)),
            Tier::Pro => Some(TimeDelta::days(270)),
            Tier::Premium => Some(TimeDelta::days(365)),
            Tier::Lifetime => None,
            Tier::Test => Some(TimeDelta::hours(1)),
        }
    }
}

/// The persisted license, as found in the license file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub license_type: String,
    pub registered_time: i64,
    pub machine_code: String,
}

impl LicenseRecord {
    pub fn new(tier: Tier, now: DateTime<Utc>, machine_code: impl Into<String>) -> Self {
        Self {
            license_type: tier.label().to_string(),
            registered_time: now.timestamp(),
            machine_code: machine_code.into(),
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        Tier::from_label(&self.license_type)
    }

    /// Seconds left on a license lasting `duration`. `None` when the stored
    /// registration time is so far out that the expiry does not fit in `i64`.
    fn seconds_left(&self, duration: TimeDelta, now: DateTime<Utc>) -> Option<i64> {
        self.registered_time
            .checked_add(duration.num_seconds())?
            .checked_sub(now.timestamp())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Remaining {
    Unbounded,
    HoursMinutes { hours: i64, minutes: i64 },
    Days(i64),
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Unbounded => write!(f, "lifetime"),
            Remaining::HoursMinutes { hours, minutes } => write!(f, "{}h {}m", hours, minutes),
            Remaining::Days(1) => write!(f, "1 day"),
            Remaining::Days(days) => write!(f, "{} days", days),
        }
    }
}

pub fn is_valid(record: &LicenseRecord, now: DateTime<Utc>) -> bool {
    let Some(tier) = record.tier() else {
        return false;
    };
    match tier.duration() {
        None => true,
        // An expiry that overflows is treated as expired.
        Some(duration) => record
            .seconds_left(duration, now)
            .is_some_and(|left| left > 0),
    }
}

/// Time left on `record`, never negative. Tiers shorter than a day report
/// hours and minutes, the rest whole days.
pub fn remaining(record: &LicenseRecord, now: DateTime<Utc>) -> Remaining {
    let Some(tier) = record.tier() else {
        return Remaining::Days(0);
    };
    let Some(duration) = tier.duration() else {
        return Remaining::Unbounded;
    };
    let left = record.seconds_left(duration, now).unwrap_or(0).max(0);
    if duration.num_seconds() < SECONDS_PER_DAY {
        Remaining::HoursMinutes {
            hours: left / 3600,
            minutes: (left % 3600) / 60,
        }
    } else {
        Remaining::Days(left / SECONDS_PER_DAY)
    }
}

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("unknown license key: {0:?}")]
    UnknownTier(String),
    #[error("license file I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("license file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The first non-zero MAC address of this host, formatted `AA:BB:CC:DD:EE:FF`.
pub fn machine_code() -> String {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<_> = networks.iter().collect();
    interfaces.sort_by(|a, b| a.0.cmp(b.0));
    let mac = interfaces
        .into_iter()
        .map(|(_, data)| data.mac_address())
        .find(|mac| !mac.is_unspecified())
        .map(|mac| mac.0)
        .unwrap_or_else(|| {
            warn!("No network interface with a hardware address found.");
            [0; 6]
        });
    format_mac(mac)
}

fn format_mac(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

pub struct LicenseStore {
    path: PathBuf,
    machine_code: String,
}

impl LicenseStore {
    pub fn new(path: impl Into<PathBuf>, machine_code: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            machine_code: machine_code.into(),
        }
    }

    pub fn machine_code(&self) -> &str {
        &self.machine_code
    }

    /// `Ok(None)` when no license file exists yet.
    pub fn load(&self) -> Result<Option<LicenseRecord>, LicenseError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn save(&self, record: &LicenseRecord) -> Result<(), LicenseError> {
        let json = serde_json::to_string(record)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Overwrites the license with `key`'s tier starting at `now`.
    /// Unknown keys leave the file untouched.
    pub fn activate(&self, key: &str, now: DateTime<Utc>) -> Result<LicenseRecord, LicenseError> {
        let tier = Tier::from_label(key).ok_or_else(|| LicenseError::UnknownTier(key.to_string()))?;
        let record = LicenseRecord::new(tier, now, self.machine_code.as_str());
        self.save(&record)?;
        info!("Activated {} license for machine {}.", tier.label(), self.machine_code);
        Ok(record)
    }

    /// Loads the license, issuing a fresh trial when there is none or the
    /// file cannot be read.
    pub fn load_or_issue_trial(&self, now: DateTime<Utc>) -> Result<LicenseRecord> {
        match self.load() {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => info!("No license at {}, starting trial.", self.path.display()),
            Err(err) => warn!(
                "Could not read license at {}: {}. Starting trial.",
                self.path.display(),
                err
            ),
        }
        let record = LicenseRecord::new(Tier::Trial, now, self.machine_code.as_str());
        self.save(&record)
            .with_context(|| format!("Failed to write trial license to {}", self.path.display()))?;
        Ok(record)
    }
}
