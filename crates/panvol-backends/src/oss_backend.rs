//! OSS mixer backend
//!
//! Talks to `/dev/mixer` through the classic soundcard ioctls. Volume is a
//! byte-packed stereo pair of 0-100 levels; there is no mute control, so
//! mute is emulated by storing the pre-mute level and writing zero.
//! External changes are synthesized by a poll thread on its own descriptor.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::adapter::{
    BackendAdapter, BackendKind, ChangeCallback, ChangeEvent, DeviceInfo, CHANGE_POLL_INTERVAL,
    VOLUME_MAX,
};
use crate::error::{BackendError, BackendResult};

const DEFAULT_MIXER: &str = "/dev/mixer";

// Classic soundcard.h ioctl encoding: _IOR/_IOWR('M', channel, int)
const MIXER_READ_BASE: libc::c_ulong = 0x8004_4d00;
const MIXER_WRITE_BASE: libc::c_ulong = 0xc004_4d00;

const SOUND_MIXER_VOLUME: libc::c_ulong = 0;
const SOUND_MIXER_PCM: libc::c_ulong = 4;
const SOUND_MIXER_DEVMASK: libc::c_ulong = 0xfe;

#[derive(Debug, Default)]
struct MuteEmu {
    muted: bool,
    stored: u16,
}

struct PollHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

pub struct OssBackend {
    file: File,
    path: String,
    channel: libc::c_ulong,
    emu: Arc<Mutex<MuteEmu>>,
    device: DeviceInfo,
    poll: Option<PollHandle>,
}

impl OssBackend {
    /// Open the mixer node (`None` = `/dev/mixer`) and pick the master
    /// volume channel, falling back to PCM when the device lacks one.
    pub fn probe(device: Option<&str>) -> BackendResult<Self> {
        let path = device.unwrap_or(DEFAULT_MIXER).to_string();
        let file = open_mixer(&path)?;

        let devmask = ioctl_read(&file, MIXER_READ_BASE | SOUND_MIXER_DEVMASK)
            .map_err(|e| map_io_err(&path, &e))?;
        let channel = if devmask & (1 << SOUND_MIXER_VOLUME) != 0 {
            SOUND_MIXER_VOLUME
        } else if devmask & (1 << SOUND_MIXER_PCM) != 0 {
            SOUND_MIXER_PCM
        } else {
            return Err(BackendError::Unavailable(format!(
                "{}: no volume or pcm channel",
                path
            )));
        };
        log::info!(
            "oss: controlling {} (channel: {})",
            path,
            if channel == SOUND_MIXER_VOLUME {
                "volume"
            } else {
                "pcm"
            }
        );

        let device = DeviceInfo {
            id: path.clone(),
            label: path.clone(),
            is_default: path == DEFAULT_MIXER,
        };

        Ok(Self {
            file,
            path,
            channel,
            emu: Arc::new(Mutex::new(MuteEmu::default())),
            device,
            poll: None,
        })
    }

    fn read_raw(&self) -> BackendResult<u16> {
        let packed = ioctl_read(&self.file, MIXER_READ_BASE | self.channel)
            .map_err(|e| map_io_err(&self.path, &e))?;
        Ok(unpack_percent(packed))
    }

    fn write_raw(&self, percent: u16) -> BackendResult<()> {
        let packed = pack_percent(percent);
        ioctl_write(&self.file, MIXER_WRITE_BASE | self.channel, packed)
            .map_err(|e| map_io_err(&self.path, &e))
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

impl BackendAdapter for OssBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Oss
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn volume(&mut self) -> BackendResult<u16> {
        let emu = self.emu.lock().unwrap();
        if emu.muted {
            return Ok(emu.stored);
        }
        drop(emu);
        self.read_raw()
    }

    fn set_volume(&mut self, percent: u16) -> BackendResult<()> {
        let mut emu = self.emu.lock().unwrap();
        if emu.muted {
            // Keep the hardware silent; remember the level for unmute.
            emu.stored = percent.min(VOLUME_MAX);
            return Ok(());
        }
        drop(emu);
        self.write_raw(percent)
    }

    fn muted(&mut self) -> BackendResult<bool> {
        Ok(self.emu.lock().unwrap().muted)
    }

    fn set_mute(&mut self, muted: bool) -> BackendResult<()> {
        let restore = {
            let mut emu = self.emu.lock().unwrap();
            if emu.muted == muted {
                return Ok(());
            }
            if muted {
                emu.stored = self.read_raw()?;
                emu.muted = true;
                None
            } else {
                emu.muted = false;
                Some(emu.stored)
            }
        };
        self.write_raw(restore.unwrap_or(0))
    }

    fn subscribe(&mut self, callback: ChangeCallback) -> BackendResult<()> {
        self.stop_poll();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let path = self.path.clone();
        let channel = self.channel;
        let emu = Arc::clone(&self.emu);

        let thread = thread::Builder::new()
            .name("panvol-oss-poll".to_string())
            .spawn(move || {
                let file = match open_mixer(&path) {
                    Ok(f) => f,
                    Err(e) => {
                        log::warn!("oss poll: cannot reopen {}: {}", path, e);
                        callback(ChangeEvent::DeviceGone);
                        return;
                    }
                };
                let mut last = read_state(&file, channel, &emu);
                while sleep_unless_stopped(&stop_thread, CHANGE_POLL_INTERVAL) {
                    match read_state(&file, channel, &emu) {
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

impl Drop for OssBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Enumerate mixer nodes: `/dev/mixer` plus any numbered siblings
pub(crate) fn list_devices() -> BackendResult<Vec<DeviceInfo>> {
    let mut out = Vec::new();
    if Path::new(DEFAULT_MIXER).exists() {
        out.push(DeviceInfo {
            id: DEFAULT_MIXER.to_string(),
            label: DEFAULT_MIXER.to_string(),
            is_default: true,
        });
    }
    for n in 0..8 {
        let path = format!("/dev/mixer{}", n);
        if Path::new(&path).exists() {
            out.push(DeviceInfo {
                id: path.clone(),
                label: path,
                is_default: false,
            });
        }
    }
    if out.is_empty() {
        return Err(BackendError::Unavailable(
            "no OSS mixer device nodes".to_string(),
        ));
    }
    Ok(out)
}

fn open_mixer(path: &str) -> BackendResult<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                BackendError::Unavailable(format!("{}: {}", path, e))
            }
            io::ErrorKind::PermissionDenied => {
                BackendError::PermissionDenied(format!("{}: {}", path, e))
            }
            _ => BackendError::Unavailable(format!("{}: {}", path, e)),
        })
}

fn read_state(file: &File, channel: libc::c_ulong, emu: &Arc<Mutex<MuteEmu>>) -> Option<(u16, bool)> {
    let packed = ioctl_read(file, MIXER_READ_BASE | channel).ok()?;
    let mut percent = unpack_percent(packed);
    let mut emu = emu.lock().unwrap();
    let muted = if emu.muted {
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
    };
    Some((percent, muted))
}

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

fn ioctl_read(file: &File, request: libc::c_ulong) -> io::Result<i32> {
    let mut value: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request as _, &mut value) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(value)
}

fn ioctl_write(file: &File, request: libc::c_ulong, value: i32) -> io::Result<()> {
    let mut value: libc::c_int = value;
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), request as _, &mut value) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// OSS packs left/right 0-100 levels into the two low bytes
fn unpack_percent(packed: i32) -> u16 {
    let left = (packed & 0x7f) as u16;
    let right = ((packed >> 8) & 0x7f) as u16;
    left.max(right).min(VOLUME_MAX)
}

fn pack_percent(percent: u16) -> i32 {
    let level = i32::from(percent.min(VOLUME_MAX));
    level | (level << 8)
}

fn map_io_err(path: &str, e: &io::Error) -> BackendError {
    match e.raw_os_error() {
        Some(errno) if errno == libc::ENODEV || errno == libc::ENXIO || errno == libc::EIO => {
            BackendError::DeviceGone(format!("{}: {}", path, e))
        }
        Some(errno) if errno == libc::EACCES || errno == libc::EPERM => {
            BackendError::PermissionDenied(format!("{}: {}", path, e))
        }
        _ => BackendError::DeviceGone(format!("{}: {}", path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trips() {
        for percent in [0u16, 1, 42, 99, 100] {
            assert_eq!(unpack_percent(pack_percent(percent)), percent);
        }
    }

    #[test]
    fn test_unpack_takes_louder_channel() {
        assert_eq!(unpack_percent(30 | (70 << 8)), 70);
    }

    #[test]
    fn test_pack_clamps_overshoot() {
        assert_eq!(pack_percent(150), 100 | (100 << 8));
    }
}
