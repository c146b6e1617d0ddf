// src/devices.rs
//! Simulated household devices and the finger-count mapping that drives them.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::landmarks::FingerStates;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Led,
    Fan,
    Ac,
    Tv,
    Stove,
}

impl Device {
    pub const ALL: [Device; 5] = [Device::Led, Device::Fan, Device::Ac, Device::Tv, Device::Stove];

    pub fn label(self) -> &'static str {
        match self {
            Device::Led => "LED",
            Device::Fan => "Fan",
            Device::Ac => "Air conditioner",
            Device::Tv => "TV",
            Device::Stove => "Stove",
        }
    }
}

/// On/off flags for the five devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStates {
    pub led: bool,
    pub fan: bool,
    pub ac: bool,
    pub tv: bool,
    pub stove: bool,
}

impl DeviceStates {
    pub const ALL_OFF: DeviceStates = DeviceStates {
        led: false,
        fan: false,
        ac: false,
        tv: false,
        stove: false,
    };

    /// One finger turns on the LED, two the fan, and so on up to five for the
    /// stove. Anything else switches everything off.
    pub fn from_finger_count(count: usize) -> Self {
        let mut states = Self::ALL_OFF;
        match count {
            1 => states.led = true,
            2 => states.fan = true,
            3 => states.ac = true,
            4 => states.tv = true,
            5 => states.stove = true,
            _ => {}
        }
        states
    }

    pub fn get(&self, device: Device) -> bool {
        match device {
            Device::Led => self.led,
            Device::Fan => self.fan,
            Device::Ac => self.ac,
            Device::Tv => self.tv,
            Device::Stove => self.stove,
        }
    }

    pub fn get_mut(&mut self, device: Device) -> &mut bool {
        match device {
            Device::Led => &mut self.led,
            Device::Fan => &mut self.fan,
            Device::Ac => &mut self.ac,
            Device::Tv => &mut self.tv,
            Device::Stove => &mut self.stove,
        }
    }

    pub fn on_count(&self) -> usize {
        Device::ALL.iter().filter(|&&d| self.get(d)).count()
    }
}

/// Device state as shown on the dashboard.
///
/// Hand readings replace the whole state; a frame without a hand leaves it
/// as it was, unless `hold_timeout` is set and no hand has been seen for that
/// long. The timeout is also checked by [`DeviceBoard::tick`], so it fires
/// when no frames arrive at all.
#[derive(Debug)]
pub struct DeviceBoard {
    states: DeviceStates,
    last_count: Option<usize>,
    last_hand_seen: Option<Instant>,
    hold_timeout: Option<Duration>,
}

impl DeviceBoard {
    pub fn new(hold_timeout: Option<Duration>) -> Self {
        Self {
            states: DeviceStates::ALL_OFF,
            last_count: None,
            last_hand_seen: None,
            hold_timeout,
        }
    }

    pub fn states(&self) -> DeviceStates {
        self.states
    }

    /// Finger count of the most recent hand, if any hand has been seen.
    pub fn last_count(&self) -> Option<usize> {
        self.last_count
    }

    /// Returns true when the device state changed.
    pub fn apply(&mut self, reading: Option<FingerStates>, now: Instant) -> bool {
        let Some(fingers) = reading else {
            return self.tick(now);
        };
        let previous = self.states;
        let count = fingers.count();
        self.states = DeviceStates::from_finger_count(count);
        self.last_count = Some(count);
        self.last_hand_seen = Some(now);
        self.log_change(previous)
    }

    /// Like [`DeviceBoard::apply`], but readings are dropped while
    /// `licensed` is false. The hold timeout still runs.
    pub fn apply_if_licensed(&mut self, reading: Option<FingerStates>, licensed: bool, now: Instant) -> bool {
        if licensed {
            self.apply(reading, now)
        } else {
            self.tick(now)
        }
    }

    /// Switches everything off once the hold timeout has passed since the
    /// last hand. Returns true when that happened.
    pub fn tick(&mut self, now: Instant) -> bool {
        let expired = match (self.hold_timeout, self.last_hand_seen) {
            (Some(timeout), Some(seen)) => now.saturating_duration_since(seen) >= timeout,
            _ => false,
        };
        if !expired {
            return false;
        }
        info!("No hand for {:?}, switching all devices off.", self.hold_timeout);
        let previous = self.states;
        self.states = DeviceStates::ALL_OFF;
        self.last_count = None;
        self.last_hand_seen = None;
        self.log_change(previous)
    }

    fn log_change(&self, previous: DeviceStates) -> bool {
        let changed = previous != self.states;
        if changed {
            debug!("Device states changed: {:?} -> {:?}", previous, self.states);
        }
        changed
    }

    pub fn toggle(&mut self, device: Device) {
        let flag = self.states.get_mut(device);
        *flag = !*flag;
        info!("{} toggled manually: {}", device.label(), if *flag { "ON" } else { "OFF" });
    }
}
