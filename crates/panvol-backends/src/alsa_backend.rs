//! ALSA mixer backend
//!
//! Controls a simple mixer element (preferring `Master`) on one card.
//! ALSA has no push notification usable without an event loop, so external
//! changes are synthesized by a poll thread holding its own mixer handle.
//! Elements without a playback switch get mute emulated by storing the
//! pre-mute level and writing zero.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use alsa::mixer::{Mixer, Selem, SelemChannelId, SelemId};

use crate::adapter::{
    BackendAdapter, BackendKind, ChangeCallback, ChangeEvent, DeviceInfo, CHANGE_POLL_INTERVAL,
    VOLUME_MAX,
};
use crate::error::{BackendError, BackendResult};

/// Mute emulation for elements without a playback switch.
/// Shared with the poll thread so synthesized events report the held
/// level instead of the zero actually written to the hardware.
#[derive(Debug, Default)]
struct MuteEmu {
    muted: bool,
    stored: u16,
}

struct PollHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

pub struct AlsaBackend {
    mixer: Mixer,
    card: String,
    selem_name: String,
    selem_index: u32,
    range: (i64, i64),
    has_switch: bool,
    emu: Arc<Mutex<MuteEmu>>,
    device: DeviceInfo,
    poll: Option<PollHandle>,
}

impl AlsaBackend {
    /// Open the mixer on the given card (`None` = "default") and pick a
    /// controllable playback element.
    pub fn probe(device: Option<&str>) -> BackendResult<Self> {
        let card = device.unwrap_or("default").to_string();
        let mixer = Mixer::new(&card, false).map_err(|e| map_open_err(&card, e))?;

        let (selem_name, selem_index) = pick_playback_elem(&mixer).ok_or_else(|| {
            BackendError::Unavailable(format!("no playback mixer control on {}", card))
        })?;

        let selem = mixer
            .find_selem(&SelemId::new(&selem_name, selem_index))
            .ok_or_else(|| {
                BackendError::Unavailable(format!("mixer control {} vanished", selem_name))
            })?;
        let range = selem.get_playback_volume_range();
        let has_switch = selem.has_playback_switch();

        log::info!(
            "alsa: controlling {} [{}] (switch: {}, range: {:?})",
            card,
            selem_name,
            has_switch,
            range
        );

        let device = DeviceInfo {
            id: card.clone(),
            label: format!("{} [{}]", card, selem_name),
            is_default: card == "default",
        };

        Ok(Self {
            mixer,
            card,
            selem_name,
            selem_index,
            range,
            has_switch,
            emu: Arc::new(Mutex::new(MuteEmu::default())),
            device,
            poll: None,
        })
    }

    fn selem(&self) -> BackendResult<Selem<'_>> {
        self.mixer
            .find_selem(&SelemId::new(&self.selem_name, self.selem_index))
            .ok_or_else(|| {
                BackendError::DeviceGone(format!("mixer control {} vanished", self.selem_name))
            })
    }

    fn stop_poll(&mut self) {
        if let Some(mut poll) = self.poll.take() {
            poll.stop.store(true, Ordering::Relaxed);
            if let Some(thread) = poll.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl BackendAdapter for AlsaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Alsa
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn volume(&mut self) -> BackendResult<u16> {
        let _ = self.mixer.handle_events();
        let state = read_state(
            &self.mixer,
            &self.selem_name,
            self.selem_index,
            self.range,
            self.has_switch,
            &self.emu,
        );
        state
            .map(|(percent, _)| percent)
            .ok_or_else(|| BackendError::DeviceGone(format!("cannot read {}", self.card)))
    }

    fn set_volume(&mut self, percent: u16) -> BackendResult<()> {
        if !self.has_switch {
            let mut emu = self.emu.lock().unwrap();
            if emu.muted {
                // Keep the hardware silent; remember the level for unmute.
                emu.stored = percent.min(VOLUME_MAX);
                return Ok(());
            }
        }
        let raw = percent_to_raw(percent, self.range);
        let selem = self.selem()?;
        selem
            .set_playback_volume_all(raw)
            .map_err(|e| map_io_err(&self.card, e))
    }

    fn muted(&mut self) -> BackendResult<bool> {
        let _ = self.mixer.handle_events();
        let state = read_state(
            &self.mixer,
            &self.selem_name,
            self.selem_index,
            self.range,
            self.has_switch,
            &self.emu,
        );
        state
            .map(|(_, muted)| muted)
            .ok_or_else(|| BackendError::DeviceGone(format!("cannot read {}", self.card)))
    }

    fn set_mute(&mut self, muted: bool) -> BackendResult<()> {
        if self.has_switch {
            let selem = self.selem()?;
            return selem
                .set_playback_switch_all(if muted { 0 } else { 1 })
                .map_err(|e| map_io_err(&self.card, e));
        }

        // No native switch: emulate with a stored level.
        let restore = {
            let mut emu = self.emu.lock().unwrap();
            if emu.muted == muted {
                return Ok(());
            }
            if muted {
                emu.stored = self.volume_unlocked()?;
                emu.muted = true;
                None
            } else {
                emu.muted = false;
                Some(emu.stored)
            }
        };
        let raw = percent_to_raw(restore.unwrap_or(0), self.range);
        let selem = self.selem()?;
        selem
            .set_playback_volume_all(raw)
            .map_err(|e| map_io_err(&self.card, e))
    }

    fn subscribe(&mut self, callback: ChangeCallback) -> BackendResult<()> {
        self.stop_poll();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let card = self.card.clone();
        let name = self.selem_name.clone();
        let index = self.selem_index;
        let range = self.range;
        let has_switch = self.has_switch;
        let emu = Arc::clone(&self.emu);

        let thread = thread::Builder::new()
            .name("panvol-alsa-poll".to_string())
            .spawn(move || {
                // The poll thread holds its own mixer handle so it never
                // contends with the engine thread's calls.
                let mixer = match Mixer::new(&card, false) {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("alsa poll: cannot reopen {}: {}", card, e);
                        callback(ChangeEvent::DeviceGone);
                        return;
                    }
                };
                let mut last = read_state(&mixer, &name, index, range, has_switch, &emu);
                while sleep_unless_stopped(&stop_thread, CHANGE_POLL_INTERVAL) {
                    if mixer.handle_events().is_err() {
                        callback(ChangeEvent::DeviceGone);
                        return;
                    }
                    match read_state(&mixer, &name, index, range, has_switch, &emu) {
                        Some(current) => {
                            if last != Some(current) {
                                last = Some(current);
                                let (percent, muted) = current;
                                callback(ChangeEvent::VolumeChanged { percent, muted });
                            }
                        }
                        None => {
                            callback(ChangeEvent::DeviceGone);
                            return;
                        }
                    }
                }
            })
            .map_err(|e| BackendError::Unavailable(format!("cannot spawn poll thread: {}", e)))?;

        self.poll = Some(PollHandle {
            stop,
            thread: Some(thread),
        });
        Ok(())
    }

    fn release(&mut self) {
        self.stop_poll();
    }
}

impl AlsaBackend {
    /// Volume read that bypasses mute emulation (raw hardware level).
    fn volume_unlocked(&self) -> BackendResult<u16> {
        let selem = self.selem()?;
        let raw = selem
            .get_playback_volume(SelemChannelId::FrontLeft)
            .map_err(|e| map_io_err(&self.card, e))?;
        Ok(raw_to_percent(raw, self.range))
    }
}

impl Drop for AlsaBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Enumerate ALSA cards, default device first
pub(crate) fn list_devices() -> BackendResult<Vec<DeviceInfo>> {
    let mut out = vec![DeviceInfo {
        id: "default".to_string(),
        label: "System default".to_string(),
        is_default: true,
    }];
    for card in alsa::card::Iter::new() {
        let card = match card {
            Ok(c) => c,
            Err(e) => {
                log::debug!("alsa: skipping unreadable card: {}", e);
                continue;
            }
        };
        let index = card.get_index();
        let label = card
            .get_name()
            .unwrap_or_else(|_| format!("card {}", index));
        out.push(DeviceInfo {
            id: format!("hw:{}", index),
            label,
            is_default: false,
        });
    }
    Ok(out)
}

/// Pick the element the applet controls: `Master` when present,
/// otherwise the first element with playback volume.
fn pick_playback_elem(mixer: &Mixer) -> Option<(String, u32)> {
    let mut first: Option<(String, u32)> = None;
    for elem in mixer.iter() {
        let selem = match Selem::new(elem) {
            Some(s) => s,
            None => continue,
        };
        if !selem.has_playback_volume() {
            continue;
        }
        let id = selem.get_id();
        let name = match id.get_name() {
            Ok(n) => n.to_string(),
            Err(_) => continue,
        };
        if name == "Master" {
            return Some((name, id.get_index()));
        }
        if first.is_none() {
            first = Some((name, id.get_index()));
        }
    }
    first
}

fn read_state(
    mixer: &Mixer,
    name: &str,
    index: u32,
    range: (i64, i64),
    has_switch: bool,
    emu: &Arc<Mutex<MuteEmu>>,
) -> Option<(u16, bool)> {
    let selem = mixer.find_selem(&SelemId::new(name, index))?;
    let raw = selem.get_playback_volume(SelemChannelId::FrontLeft).ok()?;
    let mut percent = raw_to_percent(raw, range);
    let muted = if has_switch {
        selem.get_playback_switch(SelemChannelId::FrontLeft).ok()? == 0
    } else {
        let mut emu = emu.lock().unwrap();
        if emu.muted {
            if percent == 0 {
                percent = emu.stored;
                true
            } else {
                // Something external raised the level; emulated mute is over.
                emu.muted = false;
                false
            }
        } else {
            false
        }
    };
    Some((percent, muted))
}

/// Sleep in short slices so release() never waits a full poll interval.
fn sleep_unless_stopped(stop: &AtomicBool, interval: Duration) -> bool {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
    !stop.load(Ordering::Relaxed)
}

fn raw_to_percent(raw: i64, (min, max): (i64, i64)) -> u16 {
    if max <= min {
        return 0;
    }
    let span = max - min;
    let clamped = raw.clamp(min, max);
    (((clamped - min) * i64::from(VOLUME_MAX) + span / 2) / span) as u16
}

fn percent_to_raw(percent: u16, (min, max): (i64, i64)) -> i64 {
    // ALSA cannot overshoot: 100% is the element's native maximum.
    let percent = i64::from(percent.min(VOLUME_MAX));
    min + (percent * (max - min) + 50) / 100
}

fn map_open_err(card: &str, e: alsa::Error) -> BackendError {
    if e.errno() == libc::EACCES || e.errno() == libc::EPERM {
        BackendError::PermissionDenied(format!("{}: {}", card, e))
    } else {
        BackendError::Unavailable(format!("{}: {}", card, e))
    }
}

fn map_io_err(card: &str, e: alsa::Error) -> BackendError {
    match e.errno() {
        errno if errno == libc::ENODEV || errno == libc::ENXIO || errno == libc::ENOENT => {
            BackendError::DeviceGone(format!("{}: {}", card, e))
        }
        errno if errno == libc::EACCES || errno == libc::EPERM => {
            BackendError::PermissionDenied(format!("{}: {}", card, e))
        }
        _ => BackendError::DeviceGone(format!("{}: {}", card, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_mapping_round_trips() {
        let range = (0, 65536);
        for percent in [0u16, 1, 33, 50, 99, 100] {
            let raw = percent_to_raw(percent, range);
            assert_eq!(raw_to_percent(raw, range), percent);
        }
    }

    #[test]
    fn test_raw_reads_clamp_to_range() {
        let range = (0, 100);
        assert_eq!(raw_to_percent(-5, range), 0);
        assert_eq!(raw_to_percent(250, range), 100);
    }

    #[test]
    fn test_overshoot_writes_clamp_to_native_max() {
        let range = (0, 255);
        assert_eq!(percent_to_raw(150, range), 255);
    }

    #[test]
    fn test_degenerate_range() {
        assert_eq!(raw_to_percent(42, (7, 7)), 0);
    }
}
