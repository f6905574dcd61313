//! Indicator synchronization
//!
//! Reflects model state into the event channel: icon tier, tooltip,
//! popup refreshes and the popup's auto-dismiss deadline. Never mutates
//! the model.

use std::time::{Duration, Instant};

use crossbeam::channel::Sender;

use crate::events::{EngineEvent, IconTier, IndicatorState, Notice, NoticeKind, PopupState};
use crate::model::VolumeModel;

/// How long the transient popup stays up after the last change
pub const POPUP_AUTO_DISMISS: Duration = Duration::from_millis(1500);

pub(crate) struct IndicatorSync {
    events: Sender<EngineEvent>,
    enabled: bool,
    popup_deadline: Option<Instant>,
}

impl IndicatorSync {
    pub fn new(events: Sender<EngineEvent>) -> Self {
        Self {
            events,
            enabled: true,
            popup_deadline: None,
        }
    }

    /// Emit indicator state for the model; with `show_popup`, also refresh
    /// the popup and restart its auto-dismiss timer.
    pub fn sync(&mut self, model: &VolumeModel, show_popup: bool) {
        let state = IndicatorState {
            tier: IconTier::for_state(model.percent(), model.muted()),
            tooltip: format!("Volume: {}%", model.percent()),
            enabled: self.enabled,
        };
        self.send(EngineEvent::Indicator(state));

        if show_popup {
            self.send(EngineEvent::Popup(PopupState {
                percent: model.percent(),
                muted: model.muted(),
                max: model.max(),
            }));
            self.popup_deadline = Some(Instant::now() + POPUP_AUTO_DISMISS);
        }
    }

    /// Mark the indicator enabled/disabled and re-emit its state
    pub fn set_enabled(&mut self, enabled: bool, model: &VolumeModel) {
        self.enabled = enabled;
        self.sync(model, false);
    }

    /// Surface a transient notice
    pub fn notice(&self, kind: NoticeKind, message: String) {
        log::warn!("notice ({:?}): {}", kind, message);
        self.send(EngineEvent::Notice(Notice { kind, message }));
    }

    pub fn popup_deadline(&self) -> Option<Instant> {
        self.popup_deadline
    }

    /// Fire the auto-dismiss once its deadline has passed
    pub fn tick(&mut self, now: Instant) {
        if let Some(deadline) = self.popup_deadline {
            if deadline <= now {
                self.popup_deadline = None;
                self.send(EngineEvent::PopupDismiss);
            }
        }
    }

    fn send(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("indicator: host dropped the event receiver");
        }
    }
}
