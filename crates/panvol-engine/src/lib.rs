//! Volume control engine for panel applets
//!
//! Presents one unified volume/mute model while driving exactly one
//! native audio backend (ALSA, PulseAudio or OSS), reacts to external
//! volume changes and local commands, and keeps an on-screen indicator
//! and mixer launcher synchronized.
//!
//! # Architecture
//!
//! - **Host thread(s)**: send commands through [`EngineHandle`]
//!   (non-blocking channel sends) and render [`EngineEvent`]s.
//! - **Engine thread**: owns the [`VolumeModel`] and the live backend
//!   adapter; the only code that mutates either.
//! - **Backend threads**: deliver external changes, marshaled into the
//!   engine queue by the change notifier.
//!
//! # Example Usage
//!
//! ```ignore
//! use panvol_engine::{load_config, default_config_path, start};
//!
//! let config = load_config(&default_config_path());
//! let system = start(config, None)?;
//!
//! system.handle.increase();
//! while let Ok(event) = system.events.recv() {
//!     // update icon / popup / notices
//! }
//! ```

pub mod config;
pub mod engine;
pub mod events;
pub mod launcher;
pub mod model;
pub mod shortcuts;

mod command;
mod indicator;
mod notifier;

pub use command::{Command, ScrollDirection};
pub use config::{default_config_path, load_config, save_config, VolumeConfig};
pub use engine::{start, start_with_factory, BackendFactory, Engine, EngineHandle, VolumeSystem};
pub use events::{EngineEvent, IconTier, IndicatorState, Notice, NoticeKind, PopupState};
pub use indicator::POPUP_AUTO_DISMISS;
pub use model::VolumeModel;
pub use shortcuts::{ShortcutAction, ShortcutRegistrar};
