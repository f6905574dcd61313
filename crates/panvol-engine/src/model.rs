//! The volume model: single source of truth for the indicator
//!
//! Pure state with compare-and-set semantics. The model never computes a
//! volume on its own; it mirrors the adapter's last known value, mutated
//! either by a local command (after the backend accepted it) or by an
//! external change delivered through the notifier.

use panvol_backends::{BackendKind, DeviceInfo};

#[derive(Debug)]
pub struct VolumeModel {
    percent: u16,
    muted: bool,
    max: u16,
    backend: BackendKind,
    device: Option<DeviceInfo>,
}

impl VolumeModel {
    pub fn new(backend: BackendKind, max: u16) -> Self {
        Self {
            percent: 0,
            muted: false,
            max,
            backend,
            device: None,
        }
    }

    pub fn percent(&self) -> u16 {
        self.percent
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Identity of the currently bound device, if any
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn bind_device(&mut self, backend: BackendKind, device: DeviceInfo) {
        self.backend = backend;
        self.device = Some(device);
    }

    pub fn clear_device(&mut self) {
        self.device = None;
    }

    /// Clamp a computed target into the model's valid range
    pub fn clamp(&self, target: i32) -> u16 {
        target.clamp(0, i32::from(self.max)) as u16
    }

    /// Apply a backend-confirmed local command.
    /// Returns whether the visible state actually changed.
    pub fn apply_local(&mut self, percent: u16, muted: bool) -> bool {
        self.apply(percent, muted)
    }

    /// Apply an externally observed change. Always wins over a late echo
    /// of a local command: the adapter is the single authority, so the
    /// model simply takes its value. An echo equals the mirrored state
    /// and reports no change.
    pub fn apply_external(&mut self, percent: u16, muted: bool) -> bool {
        self.apply(percent, muted)
    }

    fn apply(&mut self, percent: u16, muted: bool) -> bool {
        let percent = percent.min(self.max);
        let changed = self.percent != percent || self.muted != muted;
        self.percent = percent;
        self.muted = muted;
        changed
    }

    /// Change the ceiling, clamping the current value down if needed.
    /// Returns whether the visible state changed.
    pub fn set_max(&mut self, max: u16) -> bool {
        self.max = max;
        if self.percent > max {
            self.percent = max;
            true
        } else {
            false
        }
    }
}
