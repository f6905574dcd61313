//! Native audio control backends for the panvol engine
//!
//! Presents one capability interface over three mutually incompatible
//! control surfaces:
//! - **ALSA**: simple mixer element control via alsa-lib
//! - **PulseAudio**: sink control over a threaded mainloop
//! - **OSS**: classic `/dev/mixer` ioctls
//!
//! # Architecture
//!
//! - The engine owns exactly one live [`BackendAdapter`] at a time and is
//!   the only caller of its methods.
//! - External changes arrive through [`BackendAdapter::subscribe`]:
//!   PulseAudio delivers native push events from its mainloop thread,
//!   ALSA and OSS synthesize the same callback shape from an internal
//!   poll thread.
//! - [`open_backend`] is the only place that branches on [`BackendKind`].

mod adapter;
mod error;

#[cfg(feature = "alsa-backend")]
mod alsa_backend;

#[cfg(feature = "oss-backend")]
mod oss_backend;

#[cfg(feature = "pulse-backend")]
mod pulse_backend;

pub use adapter::{
    list_devices, open_backend, BackendAdapter, BackendKind, ChangeCallback, ChangeEvent,
    DeviceInfo, CHANGE_POLL_INTERVAL, VOLUME_MAX, VOLUME_OVERSHOOT_MAX,
};
pub use error::{BackendError, BackendResult};
