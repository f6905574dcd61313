//! Global shortcut registration boundary
//!
//! The hotkey service lives in the host; the engine only emits
//! registration requests and reports what failed. The registrar invokes
//! the handed-out [`EngineHandle`] asynchronously whenever a shortcut
//! fires; registration is never awaited by the engine loop.

use crate::engine::EngineHandle;

/// The three logical shortcut actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutAction {
    Increase,
    Decrease,
    ToggleMute,
}

impl ShortcutAction {
    pub const ALL: [ShortcutAction; 3] = [
        ShortcutAction::Increase,
        ShortcutAction::Decrease,
        ShortcutAction::ToggleMute,
    ];

    /// Stable identifier for the hotkey service
    pub fn name(&self) -> &'static str {
        match self {
            ShortcutAction::Increase => "increase-volume",
            ShortcutAction::Decrease => "decrease-volume",
            ShortcutAction::ToggleMute => "toggle-mute",
        }
    }

    /// Conventional media-key binding
    pub fn default_binding(&self) -> &'static str {
        match self {
            ShortcutAction::Increase => "XF86AudioRaiseVolume",
            ShortcutAction::Decrease => "XF86AudioLowerVolume",
            ShortcutAction::ToggleMute => "XF86AudioMute",
        }
    }

    /// Human-readable description for the hotkey service UI
    pub fn description(&self) -> &'static str {
        match self {
            ShortcutAction::Increase => "Increase sound volume",
            ShortcutAction::Decrease => "Decrease sound volume",
            ShortcutAction::ToggleMute => "Mute/unmute sound volume",
        }
    }

    /// Route a fired shortcut into the engine
    pub fn invoke(&self, handle: &EngineHandle) {
        match self {
            ShortcutAction::Increase => handle.increase(),
            ShortcutAction::Decrease => handle.decrease(),
            ShortcutAction::ToggleMute => handle.toggle_mute(),
        }
    }
}

/// Host-side hotkey service boundary
///
/// Returns the actions that could not be registered; an empty list means
/// full success. Failures are reported to the user once and do not block
/// any engine functionality.
pub trait ShortcutRegistrar {
    fn register(&mut self, handle: EngineHandle, actions: &[ShortcutAction]) -> Vec<ShortcutAction>;
}

/// User-visible text for a partial registration failure
pub(crate) fn registration_failure_notice(failed: &[ShortcutAction]) -> String {
    let names: Vec<&str> = failed.iter().map(|a| a.default_binding()).collect();
    format!(
        "Volume Control: The following shortcuts can not be registered: {}",
        names.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_notice_lists_bindings() {
        let text = registration_failure_notice(&[ShortcutAction::Increase, ShortcutAction::ToggleMute]);
        assert_eq!(
            text,
            "Volume Control: The following shortcuts can not be registered: \
             XF86AudioRaiseVolume, XF86AudioMute"
        );
    }

    #[test]
    fn test_action_names_are_distinct() {
        let mut names: Vec<&str> = ShortcutAction::ALL.iter().map(|a| a.name()).collect();
        names.dedup();
        assert_eq!(names.len(), 3);
    }
}
