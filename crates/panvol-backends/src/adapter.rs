//! The backend capability interface and kind dispatch
//!
//! `BackendAdapter` normalizes volume/mute control and external-change
//! notification across the three native control surfaces. The engine holds
//! exactly one live adapter at a time; `open_backend` is the only place
//! that branches on the backend kind.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BackendResult;

/// Nominal 0 dB ceiling, in percent
pub const VOLUME_MAX: u16 = 100;

/// Ceiling when volume beyond 100% (0 dB) is allowed.
/// Matches the conventional 1.5x-of-normal PulseAudio overshoot bound.
pub const VOLUME_OVERSHOOT_MAX: u16 = 150;

/// Poll interval used by backends without native push notification
pub const CHANGE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The native audio subsystem a device is controlled through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Alsa,
    PulseAudio,
    Oss,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Alsa => write!(f, "ALSA"),
            BackendKind::PulseAudio => write!(f, "PulseAudio"),
            BackendKind::Oss => write!(f, "OSS"),
        }
    }
}

/// Identity of a controllable output device
///
/// The `id` is backend-specific: an ALSA card ("hw:0"), a PulseAudio sink
/// name, or an OSS mixer node ("/dev/mixer0").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-specific identifier, usable as the configured device string
    pub id: String,
    /// Human-readable name for settings dropdowns
    pub label: String,
    /// Whether this is the backend's default device
    pub is_default: bool,
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// An asynchronous notification delivered by a backend subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The device's volume or mute state changed outside this engine
    VolumeChanged { percent: u16, muted: bool },
    /// The controlled device disappeared
    DeviceGone,
}

/// Callback invoked by backends on external changes.
///
/// Runs on whatever thread the backend delivers events from (the
/// PulseAudio mainloop thread, or a backend-internal poll thread); the
/// caller is responsible for marshaling into its own update context.
pub type ChangeCallback = Box<dyn Fn(ChangeEvent) + Send + Sync + 'static>;

/// Normalized volume/mute control over one native audio device
///
/// Percent arguments are expected to be clamped to the engine's `[0, MAX]`
/// range before the call; adapters map them onto the native control range
/// and clamp out-of-range native values on read.
pub trait BackendAdapter {
    fn kind(&self) -> BackendKind;

    /// Identity of the device this adapter controls
    fn device(&self) -> &DeviceInfo;

    /// Current volume in percent
    fn volume(&mut self) -> BackendResult<u16>;

    fn set_volume(&mut self, percent: u16) -> BackendResult<()>;

    fn muted(&mut self) -> BackendResult<bool>;

    fn set_mute(&mut self, muted: bool) -> BackendResult<()>;

    /// Register for external-change notification.
    ///
    /// A second call replaces the previous registration. Backends without
    /// native push notification synthesize events from an internal poll
    /// thread on [`CHANGE_POLL_INTERVAL`].
    fn subscribe(&mut self, callback: ChangeCallback) -> BackendResult<()>;

    /// Release all backend resources. Safe to call more than once.
    fn release(&mut self);
}

/// Probe a backend and open an adapter on the given device
/// (`None` selects the backend's default output).
///
/// Fails with `BackendError::Unavailable` when the requested kind is not
/// compiled in or its control surface cannot be opened.
pub fn open_backend(
    kind: BackendKind,
    device: Option<&str>,
) -> BackendResult<Box<dyn BackendAdapter>> {
    log::debug!("open_backend: probing {} (device: {:?})", kind, device);
    match kind {
        #[cfg(feature = "alsa-backend")]
        BackendKind::Alsa => Ok(Box::new(crate::alsa_backend::AlsaBackend::probe(device)?)),

        #[cfg(feature = "pulse-backend")]
        BackendKind::PulseAudio => {
            Ok(Box::new(crate::pulse_backend::PulseBackend::probe(device)?))
        }

        #[cfg(feature = "oss-backend")]
        BackendKind::Oss => Ok(Box::new(crate::oss_backend::OssBackend::probe(device)?)),

        #[allow(unreachable_patterns)]
        other => Err(crate::error::BackendError::Unavailable(format!(
            "{} support not compiled in",
            other
        ))),
    }
}

/// Enumerate the controllable output devices of one backend,
/// for settings dropdowns and diagnostics.
pub fn list_devices(kind: BackendKind) -> BackendResult<Vec<DeviceInfo>> {
    match kind {
        #[cfg(feature = "alsa-backend")]
        BackendKind::Alsa => crate::alsa_backend::list_devices(),

        #[cfg(feature = "pulse-backend")]
        BackendKind::PulseAudio => crate::pulse_backend::list_devices(),

        #[cfg(feature = "oss-backend")]
        BackendKind::Oss => crate::oss_backend::list_devices(),

        #[allow(unreachable_patterns)]
        other => Err(crate::error::BackendError::Unavailable(format!(
            "{} support not compiled in",
            other
        ))),
    }
}
