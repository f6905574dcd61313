//! Events emitted by the engine for the panel host to render
//!
//! The engine never draws anything; it describes indicator and popup
//! state on an event channel and the host turns that into pixels.

/// Icon glyph tier, by percent thresholds on the nominal 100% scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconTier {
    Muted,
    Low,
    Medium,
    High,
}

impl IconTier {
    pub fn for_state(percent: u16, muted: bool) -> Self {
        if muted || percent == 0 {
            IconTier::Muted
        } else if percent <= 33 {
            IconTier::Low
        } else if percent <= 66 {
            IconTier::Medium
        } else {
            IconTier::High
        }
    }

    /// Freedesktop icon name for this tier
    pub fn icon_name(&self) -> &'static str {
        match self {
            IconTier::Muted => "audio-volume-muted",
            IconTier::Low => "audio-volume-low",
            IconTier::Medium => "audio-volume-medium",
            IconTier::High => "audio-volume-high",
        }
    }
}

/// What the panel button should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorState {
    pub tier: IconTier,
    pub tooltip: String,
    /// false while no device is under control (disconnected state)
    pub enabled: bool,
}

/// What the transient popup should show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupState {
    pub percent: u16,
    pub muted: bool,
    /// Slider ceiling (100, or 150 with overshoot allowed)
    pub max: u16,
}

/// Category of a transient, non-fatal notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    CommandFailed,
    ShortcutRegistrationFailed,
    MixerLaunchFailed,
}

/// A user-visible, non-blocking notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

/// Engine output, consumed by the panel host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Icon or tooltip changed
    Indicator(IndicatorState),
    /// Show or refresh the popup (restarts its auto-dismiss timer)
    Popup(PopupState),
    /// The auto-dismiss delay elapsed; hide the popup
    PopupDismiss,
    /// Show a transient notice
    Notice(Notice),
}
