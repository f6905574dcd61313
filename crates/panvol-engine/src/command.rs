//! Commands sent from the host (UI, hotkeys, popup) to the engine thread
//!
//! The engine thread owns the model and the backend binding exclusively;
//! everything else talks to it through these messages on one channel, so
//! user commands and backend change events can never race.

use crossbeam::channel::{unbounded, Receiver, Sender};
use panvol_backends::ChangeEvent;

use crate::config::VolumeConfig;

/// Scroll wheel direction over the indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

/// A user action routed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Step the volume up (hotkey)
    Increase,
    /// Step the volume down (hotkey)
    Decrease,
    /// Toggle mute (hotkey)
    ToggleMute,
    /// Jump to an absolute level (popup slider drag)
    SetAbsolute { percent: u16 },
    /// Scroll over the indicator; delegates to increase/decrease
    Scroll { direction: ScrollDirection },
    /// Middle click on the indicator; toggles mute when configured
    MiddleClick,
    /// Plain click on the indicator; shows the popup when configured
    Click,
    /// Launch the external mixer
    LaunchMixer,
}

/// Everything the engine thread can receive
pub(crate) enum EngineMsg {
    Command(Command),
    Change(ChangeEvent),
    Reconfigure(VolumeConfig),
    Shutdown,
}

/// Create the engine's input channel
pub(crate) fn engine_channel() -> (Sender<EngineMsg>, Receiver<EngineMsg>) {
    unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_channel() {
        let (tx, rx) = engine_channel();
        tx.send(EngineMsg::Command(Command::Increase)).unwrap();
        assert!(matches!(
            rx.recv().unwrap(),
            EngineMsg::Command(Command::Increase)
        ));
        assert!(rx.try_recv().is_err());
    }
}
