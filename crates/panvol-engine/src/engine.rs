//! The engine dispatch loop
//!
//! One worker thread owns the model and the live backend binding. User
//! commands, backend change events, reconfiguration and shutdown all
//! arrive as messages on a single channel; indicator updates, popup
//! refreshes and notices leave on the event channel. No lock is ever held
//! across a backend call.
//!
//! The loop services two soft timers by receiving with a timeout against
//! the nearest deadline: the popup auto-dismiss and the re-probe backoff
//! that recovers from a vanished device.

use std::io;
use std::mem;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use panvol_backends::{
    open_backend, BackendAdapter, BackendError, BackendKind, BackendResult, ChangeEvent,
};

use crate::command::{engine_channel, Command, EngineMsg, ScrollDirection};
use crate::config::VolumeConfig;
use crate::events::{EngineEvent, Notice, NoticeKind};
use crate::indicator::IndicatorSync;
use crate::launcher;
use crate::model::VolumeModel;
use crate::notifier::ChangeNotifier;
use crate::shortcuts::{registration_failure_notice, ShortcutAction, ShortcutRegistrar};

/// First re-probe delay after losing the device
const RETRY_INITIAL: Duration = Duration::from_millis(500);

/// Backoff ceiling for the re-probe loop
const RETRY_MAX: Duration = Duration::from_secs(5);

/// Opens backend adapters for the engine.
///
/// The production factory probes the real backends; tests inject scripted
/// ones.
pub trait BackendFactory: Send {
    fn open(
        &mut self,
        kind: BackendKind,
        device: Option<&str>,
    ) -> BackendResult<Box<dyn BackendAdapter>>;
}

/// Probes the native backends via `panvol-backends`
struct SystemBackendFactory;

impl BackendFactory for SystemBackendFactory {
    fn open(
        &mut self,
        kind: BackendKind,
        device: Option<&str>,
    ) -> BackendResult<Box<dyn BackendAdapter>> {
        open_backend(kind, device)
    }
}

/// Cloneable command sender for the host (UI, hotkeys, popup)
#[derive(Clone)]
pub struct EngineHandle {
    tx: Sender<EngineMsg>,
}

impl EngineHandle {
    pub fn increase(&self) {
        self.send(Command::Increase);
    }

    pub fn decrease(&self) {
        self.send(Command::Decrease);
    }

    pub fn toggle_mute(&self) {
        self.send(Command::ToggleMute);
    }

    /// Jump to an absolute level (popup slider drag). Out-of-range values
    /// clamp to the nearest bound.
    pub fn set_absolute(&self, percent: u16) {
        self.send(Command::SetAbsolute { percent });
    }

    pub fn scroll(&self, direction: ScrollDirection) {
        self.send(Command::Scroll { direction });
    }

    pub fn middle_click(&self) {
        self.send(Command::MiddleClick);
    }

    pub fn click(&self) {
        self.send(Command::Click);
    }

    pub fn launch_mixer(&self) {
        self.send(Command::LaunchMixer);
    }

    /// Apply a new configuration on the engine thread
    pub fn reconfigure(&self, config: VolumeConfig) {
        if self.tx.send(EngineMsg::Reconfigure(config)).is_err() {
            log::debug!("engine handle: engine already stopped");
        }
    }

    fn send(&self, command: Command) {
        if self.tx.send(EngineMsg::Command(command)).is_err() {
            log::debug!("engine handle: engine already stopped");
        }
    }
}

/// Handle that keeps the engine thread alive; drop (or `stop`) to shut down
pub struct Engine {
    tx: Sender<EngineMsg>,
    thread: Option<JoinHandle<()>>,
}

impl Engine {
    /// Stop the engine and join its thread
    pub fn stop(mut self) {
        self.shutdown_join();
    }

    fn shutdown_join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(EngineMsg::Shutdown);
            let _ = thread.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown_join();
    }
}

/// Everything the host needs after starting the engine
pub struct VolumeSystem {
    /// Keeps the engine alive; drop to stop
    pub engine: Engine,
    /// Command sender for UI/hotkey events
    pub handle: EngineHandle,
    /// Indicator/popup/notice events to render
    pub events: Receiver<EngineEvent>,
}

/// Start the engine against the real backends.
///
/// Always succeeds in reaching the running state: if no backend is
/// reachable the engine starts disabled and keeps re-probing on a
/// backoff timer.
pub fn start(
    config: VolumeConfig,
    registrar: Option<&mut dyn ShortcutRegistrar>,
) -> io::Result<VolumeSystem> {
    start_with_factory(config, Box::new(SystemBackendFactory), registrar)
}

/// Start the engine with an injected backend factory
pub fn start_with_factory(
    config: VolumeConfig,
    factory: Box<dyn BackendFactory>,
    registrar: Option<&mut dyn ShortcutRegistrar>,
) -> io::Result<VolumeSystem> {
    let (tx, rx) = engine_channel();
    let (event_tx, event_rx) = unbounded();
    let handle = EngineHandle { tx: tx.clone() };

    // Fire-and-forget; a partial failure is reported once and changes nothing else.
    if let Some(registrar) = registrar {
        let failed = registrar.register(handle.clone(), &ShortcutAction::ALL);
        if !failed.is_empty() {
            let message = registration_failure_notice(&failed);
            log::warn!("{}", message);
            let _ = event_tx.send(EngineEvent::Notice(Notice {
                kind: NoticeKind::ShortcutRegistrationFailed,
                message,
            }));
        }
    }

    let model = VolumeModel::new(config.backend, config.max_volume());
    let notifier = ChangeNotifier::new(tx.clone());
    let indicator = IndicatorSync::new(event_tx);

    // Backend handles (PulseAudio's in particular) are not Send; the core
    // is assembled on the engine thread so they never leave it.
    let thread = thread::Builder::new()
        .name("panvol-engine".to_string())
        .spawn(move || {
            let core = EngineCore {
                model,
                binding: Binding::Disconnected {
                    next_retry: Instant::now(),
                    delay: RETRY_INITIAL,
                },
                factory,
                notifier,
                indicator,
                config,
            };
            run(core, rx)
        })?;

    Ok(VolumeSystem {
        engine: Engine {
            tx,
            thread: Some(thread),
        },
        handle,
        events: event_rx,
    })
}

enum Binding {
    Bound(Box<dyn BackendAdapter>),
    Disconnected { next_retry: Instant, delay: Duration },
}

struct EngineCore {
    config: VolumeConfig,
    model: VolumeModel,
    binding: Binding,
    factory: Box<dyn BackendFactory>,
    notifier: ChangeNotifier,
    indicator: IndicatorSync,
}

fn run(mut core: EngineCore, rx: Receiver<EngineMsg>) {
    core.try_bind();
    if !core.is_bound() {
        core.indicator.set_enabled(false, &core.model);
    }

    loop {
        let msg = match core.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => break,
            },
        };

        match msg {
            Some(EngineMsg::Command(command)) => core.handle_command(command),
            Some(EngineMsg::Change(event)) => core.handle_change(event),
            Some(EngineMsg::Reconfigure(config)) => core.reconfigure(config),
            Some(EngineMsg::Shutdown) => break,
            None => core.handle_deadlines(),
        }
    }

    core.teardown_binding();
    log::debug!("engine: stopped");
}

impl EngineCore {
    fn is_bound(&self) -> bool {
        matches!(self.binding, Binding::Bound(_))
    }

    // ─── command routing ─────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Increase => self.adjust(i32::from(self.config.effective_step())),
            Command::Decrease => self.adjust(-i32::from(self.config.effective_step())),
            Command::Scroll {
                direction: ScrollDirection::Up,
            } => self.adjust(i32::from(self.config.effective_step())),
            Command::Scroll {
                direction: ScrollDirection::Down,
            } => self.adjust(-i32::from(self.config.effective_step())),
            Command::ToggleMute => self.toggle_mute(),
            Command::SetAbsolute { percent } => {
                let target = self.model.clamp(i32::from(percent));
                self.set_volume_command(target);
            }
            Command::MiddleClick => {
                if self.config.mute_on_middle_click {
                    self.toggle_mute();
                }
            }
            Command::Click => {
                if self.config.show_on_click {
                    self.indicator.sync(&self.model, true);
                }
            }
            Command::LaunchMixer => self.launch_mixer(),
        }
    }

    fn adjust(&mut self, delta: i32) {
        let target = self.model.clamp(i32::from(self.model.percent()) + delta);
        self.set_volume_command(target);
    }

    fn set_volume_command(&mut self, target: u16) {
        let adapter = match &mut self.binding {
            Binding::Bound(adapter) => adapter,
            Binding::Disconnected { .. } => return self.reject_disconnected(),
        };
        match adapter.set_volume(target) {
            Ok(()) => {
                let muted = self.model.muted();
                self.model.apply_local(target, muted);
                // A no-op at the bounds still refreshes the popup.
                self.indicator.sync(&self.model, true);
            }
            Err(e) => self.command_failed(e),
        }
    }

    fn toggle_mute(&mut self) {
        let target = !self.model.muted();
        let adapter = match &mut self.binding {
            Binding::Bound(adapter) => adapter,
            Binding::Disconnected { .. } => return self.reject_disconnected(),
        };
        match adapter.set_mute(target) {
            Ok(()) => {
                let percent = self.model.percent();
                self.model.apply_local(percent, target);
                self.indicator.sync(&self.model, true);
            }
            Err(e) => self.command_failed(e),
        }
    }

    fn launch_mixer(&mut self) {
        if let Err(e) = launcher::launch(&self.config.mixer_command) {
            self.indicator.notice(
                NoticeKind::MixerLaunchFailed,
                format!("cannot launch mixer '{}': {}", self.config.mixer_command, e),
            );
        }
    }

    /// A set call failed: the model was never touched, so it still holds
    /// the last backend-confirmed value. Surface the failure; a vanished
    /// device additionally enters the recovery loop.
    fn command_failed(&mut self, e: BackendError) {
        self.indicator
            .notice(NoticeKind::CommandFailed, format!("volume command failed: {}", e));
        if matches!(e, BackendError::DeviceGone(_)) {
            self.begin_recovery("device lost during command");
        }
    }

    fn reject_disconnected(&mut self) {
        self.indicator.notice(
            NoticeKind::CommandFailed,
            "no audio device available".to_string(),
        );
    }

    // ─── external changes ────────────────────────────────────────────

    fn handle_change(&mut self, event: ChangeEvent) {
        match event {
            ChangeEvent::VolumeChanged { percent, muted } => {
                if !self.is_bound() {
                    // Stale event from an adapter torn down since.
                    return;
                }
                if self.model.apply_external(percent, muted) {
                    self.indicator.sync(&self.model, true);
                }
            }
            ChangeEvent::DeviceGone => {
                if self.is_bound() {
                    self.begin_recovery("backend reported device loss");
                }
            }
        }
    }

    // ─── binding lifecycle ───────────────────────────────────────────

    fn try_bind(&mut self) {
        let next_delay = match &self.binding {
            Binding::Disconnected { delay, .. } => *delay,
            Binding::Bound(_) => RETRY_INITIAL,
        };
        let opened = self
            .factory
            .open(self.config.backend, self.config.device.as_deref());
        match opened.and_then(|adapter| self.adopt(adapter)) {
            Ok(()) => {}
            Err(e) => {
                log::warn!(
                    "engine: {} probe failed ({}), retrying in {:?}",
                    self.config.backend,
                    e,
                    next_delay
                );
                self.binding = Binding::Disconnected {
                    next_retry: Instant::now() + next_delay,
                    delay: (next_delay * 2).min(RETRY_MAX),
                };
            }
        }
    }

    fn adopt(&mut self, mut adapter: Box<dyn BackendAdapter>) -> BackendResult<()> {
        let percent = adapter.volume()?;
        let muted = adapter.muted()?;
        self.notifier.attach(adapter.as_mut())?;

        self.model
            .bind_device(adapter.kind(), adapter.device().clone());
        self.model.apply_external(percent, muted);
        log::info!(
            "engine: bound {} device '{}' at {}%{}",
            adapter.kind(),
            adapter.device().label,
            percent,
            if muted { " (muted)" } else { "" }
        );
        self.binding = Binding::Bound(adapter);
        self.indicator.set_enabled(true, &self.model);
        Ok(())
    }

    /// Tear down any live binding; the old adapter is fully released
    /// before a new one can be probed.
    fn teardown_binding(&mut self) {
        let parked = Binding::Disconnected {
            next_retry: Instant::now(),
            delay: RETRY_INITIAL,
        };
        if let Binding::Bound(mut adapter) = mem::replace(&mut self.binding, parked) {
            adapter.release();
        }
        self.model.clear_device();
    }

    fn begin_recovery(&mut self, reason: &str) {
        log::warn!("engine: {}; re-probing", reason);
        self.teardown_binding();
        self.indicator.set_enabled(false, &self.model);
        self.try_bind();
    }

    // ─── reconfiguration ─────────────────────────────────────────────

    fn reconfigure(&mut self, config: VolumeConfig) {
        let rebind =
            config.backend != self.config.backend || config.device != self.config.device;
        self.config = config;
        let new_max = self.config.max_volume();

        if rebind {
            self.model.set_max(new_max);
            self.begin_recovery("backend selection changed");
            return;
        }

        if new_max != self.model.max() {
            if self.model.percent() > new_max {
                // Write the clamped level so the model keeps mirroring the device.
                if let Binding::Bound(adapter) = &mut self.binding {
                    if let Err(e) = adapter.set_volume(new_max) {
                        log::warn!("engine: failed to clamp volume on reconfigure: {}", e);
                    }
                }
            }
            if self.model.set_max(new_max) {
                self.indicator.sync(&self.model, false);
            }
        }
    }

    // ─── timers ──────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        let retry = match &self.binding {
            Binding::Disconnected { next_retry, .. } => Some(*next_retry),
            Binding::Bound(_) => None,
        };
        let popup = self.indicator.popup_deadline();
        match (retry, popup) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_deadlines(&mut self) {
        let now = Instant::now();
        self.indicator.tick(now);
        if let Binding::Disconnected { next_retry, .. } = &self.binding {
            if *next_retry <= now {
                self.try_bind();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::IconTier;
    use panvol_backends::{ChangeCallback, DeviceInfo};
    use std::sync::{Arc, Mutex};

    /// What the next failing call should return
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum FailMode {
        Unavailable,
        DeviceGone,
    }

    #[derive(Default)]
    struct MockState {
        percent: u16,
        muted: bool,
        fail_sets: Option<FailMode>,
        callback: Option<ChangeCallback>,
        set_log: Vec<u16>,
        released: u32,
    }

    struct MockBackend {
        state: Arc<Mutex<MockState>>,
        device: DeviceInfo,
    }

    impl MockBackend {
        fn fail(mode: FailMode) -> BackendError {
            match mode {
                FailMode::Unavailable => BackendError::Unavailable("mock down".to_string()),
                FailMode::DeviceGone => BackendError::DeviceGone("mock unplugged".to_string()),
            }
        }
    }

    impl BackendAdapter for MockBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Alsa
        }

        fn device(&self) -> &DeviceInfo {
            &self.device
        }

        fn volume(&mut self) -> BackendResult<u16> {
            Ok(self.state.lock().unwrap().percent)
        }

        fn set_volume(&mut self, percent: u16) -> BackendResult<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(mode) = state.fail_sets {
                return Err(Self::fail(mode));
            }
            state.percent = percent;
            state.set_log.push(percent);
            Ok(())
        }

        fn muted(&mut self) -> BackendResult<bool> {
            Ok(self.state.lock().unwrap().muted)
        }

        fn set_mute(&mut self, muted: bool) -> BackendResult<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(mode) = state.fail_sets {
                return Err(Self::fail(mode));
            }
            state.muted = muted;
            Ok(())
        }

        fn subscribe(&mut self, callback: ChangeCallback) -> BackendResult<()> {
            self.state.lock().unwrap().callback = Some(callback);
            Ok(())
        }

        fn release(&mut self) {
            let mut state = self.state.lock().unwrap();
            state.released += 1;
            state.callback = None;
        }
    }

    struct MockFactory {
        state: Arc<Mutex<MockState>>,
        fail_opens: Arc<Mutex<u32>>,
    }

    impl BackendFactory for MockFactory {
        fn open(
            &mut self,
            _kind: BackendKind,
            _device: Option<&str>,
        ) -> BackendResult<Box<dyn BackendAdapter>> {
            {
                let mut fails = self.fail_opens.lock().unwrap();
                if *fails > 0 {
                    *fails -= 1;
                    return Err(BackendError::Unavailable("mock daemon down".to_string()));
                }
            }
            Ok(Box::new(MockBackend {
                state: Arc::clone(&self.state),
                device: DeviceInfo {
                    id: "mock0".to_string(),
                    label: "Mock Output".to_string(),
                    is_default: true,
                },
            }))
        }
    }

    struct Fixture {
        system: VolumeSystem,
        state: Arc<Mutex<MockState>>,
        fail_opens: Arc<Mutex<u32>>,
    }

    fn test_config(step: u16, allow_overshoot: bool) -> VolumeConfig {
        VolumeConfig {
            backend: BackendKind::Alsa,
            device: None,
            step,
            allow_overshoot,
            mute_on_middle_click: true,
            show_on_click: true,
            mixer_command: "true".to_string(),
        }
    }

    fn start_fixture(config: VolumeConfig, initial_percent: u16) -> Fixture {
        let state = Arc::new(Mutex::new(MockState {
            percent: initial_percent,
            ..MockState::default()
        }));
        let fail_opens = Arc::new(Mutex::new(0));
        let factory = MockFactory {
            state: Arc::clone(&state),
            fail_opens: Arc::clone(&fail_opens),
        };
        let system = start_with_factory(config, Box::new(factory), None).unwrap();
        let fixture = Fixture {
            system,
            state,
            fail_opens,
        };
        // The initial bind emits one enabled indicator; start from a clean slate.
        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Indicator(state) if state.enabled)
        });
        fixture
    }

    fn fire(state: &Arc<Mutex<MockState>>, event: ChangeEvent) {
        let guard = state.lock().unwrap();
        let callback = guard.callback.as_ref().expect("no subscription");
        callback(event);
    }

    fn wait_for<F>(events: &Receiver<EngineEvent>, pred: F) -> EngineEvent
    where
        F: Fn(&EngineEvent) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if pred(&event) {
                        return event;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => panic!("engine stopped unexpectedly"),
            }
        }
        panic!("timed out waiting for event");
    }

    fn wait_for_tooltip(events: &Receiver<EngineEvent>, tooltip: &str) {
        wait_for(events, |event| {
            matches!(event, EngineEvent::Indicator(state) if state.tooltip == tooltip)
        });
    }

    fn collect_for(events: &Receiver<EngineEvent>, window: Duration) -> Vec<EngineEvent> {
        let deadline = Instant::now() + window;
        let mut out = Vec::new();
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return out;
            }
            match events.recv_timeout(left) {
                Ok(event) => out.push(event),
                Err(_) => return out,
            }
        }
    }

    #[test]
    fn test_step_round_trip() {
        let fixture = start_fixture(test_config(5, false), 50);
        fixture.system.handle.increase();
        wait_for_tooltip(&fixture.system.events, "Volume: 55%");
        fixture.system.handle.decrease();
        wait_for_tooltip(&fixture.system.events, "Volume: 50%");
        assert_eq!(fixture.state.lock().unwrap().percent, 50);
    }

    #[test]
    fn test_increase_clamps_at_max() {
        // step=5, MAX=100, start=98: one step lands exactly on 100
        let fixture = start_fixture(test_config(5, false), 98);
        fixture.system.handle.increase();
        wait_for_tooltip(&fixture.system.events, "Volume: 100%");
        assert_eq!(fixture.state.lock().unwrap().percent, 100);
    }

    #[test]
    fn test_increase_at_max_still_shows_popup() {
        let fixture = start_fixture(test_config(5, false), 100);
        fixture.system.handle.increase();
        let event = wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Popup(_))
        });
        match event {
            EngineEvent::Popup(popup) => assert_eq!(popup.percent, 100),
            _ => unreachable!(),
        }
        assert_eq!(fixture.state.lock().unwrap().percent, 100);
    }

    #[test]
    fn test_decrease_at_zero_does_not_mute() {
        let fixture = start_fixture(test_config(5, false), 2);
        fixture.system.handle.decrease();
        wait_for_tooltip(&fixture.system.events, "Volume: 0%");
        let state = fixture.state.lock().unwrap();
        assert_eq!(state.percent, 0);
        assert!(!state.muted);
    }

    #[test]
    fn test_set_absolute_clamps_out_of_range() {
        let fixture = start_fixture(test_config(5, false), 50);
        fixture.system.handle.set_absolute(500);
        wait_for_tooltip(&fixture.system.events, "Volume: 100%");
        assert_eq!(fixture.state.lock().unwrap().percent, 100);
    }

    #[test]
    fn test_scroll_delegates_to_step() {
        let fixture = start_fixture(test_config(4, false), 40);
        fixture.system.handle.scroll(ScrollDirection::Up);
        wait_for_tooltip(&fixture.system.events, "Volume: 44%");
        fixture.system.handle.scroll(ScrollDirection::Down);
        wait_for_tooltip(&fixture.system.events, "Volume: 40%");
    }

    #[test]
    fn test_toggle_mute_twice_preserves_percent() {
        let fixture = start_fixture(test_config(5, false), 64);
        fixture.system.handle.toggle_mute();
        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Indicator(state) if state.tier == IconTier::Muted)
        });
        assert_eq!(fixture.state.lock().unwrap().percent, 64);

        fixture.system.handle.toggle_mute();
        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Indicator(state) if state.tier == IconTier::Medium)
        });
        let state = fixture.state.lock().unwrap();
        assert!(!state.muted);
        assert_eq!(state.percent, 64);
    }

    #[test]
    fn test_external_change_triggers_one_indicator_update() {
        let fixture = start_fixture(test_config(5, false), 30);
        fire(&fixture.state, ChangeEvent::VolumeChanged {
            percent: 60,
            muted: false,
        });
        let events = collect_for(&fixture.system.events, Duration::from_millis(400));
        let indicators: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, EngineEvent::Indicator(_)))
            .collect();
        assert_eq!(indicators.len(), 1, "events: {:?}", events);
        match indicators[0] {
            EngineEvent::Indicator(state) => assert_eq!(state.tooltip, "Volume: 60%"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_external_echo_is_quiet() {
        let fixture = start_fixture(test_config(5, false), 30);
        // Same value as the model already mirrors: no indicator churn
        fire(&fixture.state, ChangeEvent::VolumeChanged {
            percent: 30,
            muted: false,
        });
        let events = collect_for(&fixture.system.events, Duration::from_millis(300));
        assert!(
            events
                .iter()
                .all(|event| !matches!(event, EngineEvent::Indicator(_))),
            "events: {:?}",
            events
        );
    }

    #[test]
    fn test_command_failure_reverts_and_notifies() {
        let fixture = start_fixture(test_config(5, false), 50);
        fixture.state.lock().unwrap().fail_sets = Some(FailMode::Unavailable);
        fixture.system.handle.increase();
        wait_for(&fixture.system.events, |event| {
            matches!(
                event,
                EngineEvent::Notice(notice) if notice.kind == NoticeKind::CommandFailed
            )
        });
        // Model still holds the last confirmed value
        fixture.state.lock().unwrap().fail_sets = None;
        fixture.system.handle.increase();
        wait_for_tooltip(&fixture.system.events, "Volume: 55%");
    }

    #[test]
    fn test_device_gone_recovery_cycle() {
        let fixture = start_fixture(test_config(5, false), 50);

        // The device vanishes mid-command and the first re-probe fails.
        {
            let mut state = fixture.state.lock().unwrap();
            state.fail_sets = Some(FailMode::DeviceGone);
        }
        *fixture.fail_opens.lock().unwrap() = 1;
        fixture.system.handle.increase();

        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Indicator(state) if !state.enabled)
        });

        // Commands in the disconnected window are rejected, not crashed on.
        fixture.system.handle.increase();
        wait_for(&fixture.system.events, |event| {
            matches!(
                event,
                EngineEvent::Notice(notice) if notice.kind == NoticeKind::CommandFailed
                    && notice.message.contains("no audio device")
            )
        });

        // Device returns; the backoff retry rebinds without a restart.
        fixture.state.lock().unwrap().fail_sets = None;
        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Indicator(state) if state.enabled)
        });

        fixture.system.handle.increase();
        wait_for_tooltip(&fixture.system.events, "Volume: 55%");
    }

    #[test]
    fn test_overshoot_reconfigure_clamps_down() {
        let mut config = test_config(5, true);
        let fixture = start_fixture(config.clone(), 0);

        fixture.system.handle.set_absolute(120);
        wait_for_tooltip(&fixture.system.events, "Volume: 120%");

        config.allow_overshoot = false;
        fixture.system.handle.reconfigure(config);
        wait_for_tooltip(&fixture.system.events, "Volume: 100%");

        let state = fixture.state.lock().unwrap();
        assert_eq!(state.percent, 100);
        assert!(state.set_log.contains(&100));
    }

    #[test]
    fn test_middle_click_honors_config() {
        let mut config = test_config(5, false);
        config.mute_on_middle_click = false;
        let fixture = start_fixture(config, 50);

        fixture.system.handle.middle_click();
        let events = collect_for(&fixture.system.events, Duration::from_millis(300));
        assert!(events.is_empty(), "events: {:?}", events);
        assert!(!fixture.state.lock().unwrap().muted);
    }

    #[test]
    fn test_middle_click_mutes_when_enabled() {
        let fixture = start_fixture(test_config(5, false), 50);
        fixture.system.handle.middle_click();
        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Indicator(state) if state.tier == IconTier::Muted)
        });
        assert!(fixture.state.lock().unwrap().muted);
    }

    #[test]
    fn test_click_shows_popup_without_changing_state() {
        let fixture = start_fixture(test_config(5, false), 50);
        fixture.system.handle.click();
        let event = wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Popup(_))
        });
        match event {
            EngineEvent::Popup(popup) => {
                assert_eq!(popup.percent, 50);
                assert!(!popup.muted);
            }
            _ => unreachable!(),
        }
        assert_eq!(fixture.state.lock().unwrap().percent, 50);
    }

    #[test]
    fn test_popup_auto_dismisses() {
        let fixture = start_fixture(test_config(5, false), 50);
        fixture.system.handle.increase();
        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::Popup(_))
        });
        wait_for(&fixture.system.events, |event| {
            matches!(event, EngineEvent::PopupDismiss)
        });
    }

    #[test]
    fn test_mixer_launch_failure_notice() {
        let mut config = test_config(5, false);
        config.mixer_command = "/nonexistent/mixer-binary".to_string();
        let fixture = start_fixture(config, 50);
        fixture.system.handle.launch_mixer();
        wait_for(&fixture.system.events, |event| {
            matches!(
                event,
                EngineEvent::Notice(notice) if notice.kind == NoticeKind::MixerLaunchFailed
            )
        });
    }

    #[test]
    fn test_shortcut_registration_failure_is_reported_once() {
        struct FailingRegistrar;
        impl ShortcutRegistrar for FailingRegistrar {
            fn register(
                &mut self,
                _handle: EngineHandle,
                actions: &[ShortcutAction],
            ) -> Vec<ShortcutAction> {
                vec![actions[0]]
            }
        }

        let state = Arc::new(Mutex::new(MockState {
            percent: 50,
            ..MockState::default()
        }));
        let factory = MockFactory {
            state: Arc::clone(&state),
            fail_opens: Arc::new(Mutex::new(0)),
        };
        let mut registrar = FailingRegistrar;
        let system =
            start_with_factory(test_config(5, false), Box::new(factory), Some(&mut registrar))
                .unwrap();

        let event = wait_for(&system.events, |event| {
            matches!(event, EngineEvent::Notice(_))
        });
        match event {
            EngineEvent::Notice(notice) => {
                assert_eq!(notice.kind, NoticeKind::ShortcutRegistrationFailed);
                assert!(notice.message.contains("can not be registered"));
                assert!(notice.message.contains("XF86AudioRaiseVolume"));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_shutdown_releases_backend() {
        let fixture = start_fixture(test_config(5, false), 50);
        let state = Arc::clone(&fixture.state);
        fixture.system.engine.stop();
        assert!(state.lock().unwrap().released >= 1);
    }
}
