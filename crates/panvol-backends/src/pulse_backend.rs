//! PulseAudio sink backend
//!
//! Drives one sink through a threaded mainloop. The adapter caches the
//! sink's state and serves reads from the cache, so the engine thread
//! never waits on a PulseAudio round-trip; writes are fire-and-forget
//! introspection calls. Connection establishment and the initial sink
//! query are bounded by a deadline, after which probing fails.
//!
//! When no device is configured the adapter tracks `@DEFAULT_SINK@` and
//! follows server-side default changes.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use libpulse_binding::callbacks::ListResult;
use libpulse_binding::context::introspect::{Introspector, SinkInfo};
use libpulse_binding::context::subscribe::{Facility, InterestMaskSet, Operation as SinkOp};
use libpulse_binding::context::{Context, FlagSet, State};
use libpulse_binding::mainloop::threaded::Mainloop;
use libpulse_binding::volume::{ChannelVolumes, Volume};

use crate::adapter::{
    BackendAdapter, BackendKind, ChangeCallback, ChangeEvent, DeviceInfo, VOLUME_OVERSHOOT_MAX,
};
use crate::error::{BackendError, BackendResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const WAIT_SLICE: Duration = Duration::from_millis(10);

const DEFAULT_SINK: &str = "@DEFAULT_SINK@";

/// Sink state cache shared with the mainloop thread
#[derive(Default)]
struct SinkShared {
    index: u32,
    channels: u8,
    percent: u16,
    muted: bool,
    name: String,
    description: String,
    ready: bool,
    failed: bool,
    gone: bool,
    track_default: bool,
    callback: Option<Arc<ChangeCallback>>,
}

pub struct PulseBackend {
    mainloop: Mainloop,
    context: Context,
    shared: Arc<Mutex<SinkShared>>,
    device: DeviceInfo,
    subscribed: bool,
    released: bool,
}

impl PulseBackend {
    /// Connect to the daemon and resolve the controlled sink
    /// (`None` = the server default, followed across default changes).
    pub fn probe(device: Option<&str>) -> BackendResult<Self> {
        let (mut mainloop, mut context) = connect()?;

        let shared = Arc::new(Mutex::new(SinkShared {
            track_default: device.is_none(),
            ..SinkShared::default()
        }));
        let target = device.unwrap_or(DEFAULT_SINK).to_string();

        mainloop.lock();
        let introspect = context.introspect();
        let shared_q = Arc::clone(&shared);
        introspect.get_sink_info_by_name(&target, move |res| match res {
            ListResult::Item(info) => apply_sink_info(&shared_q, info, false),
            ListResult::End => {
                let mut s = shared_q.lock().unwrap();
                if !s.ready {
                    s.failed = true;
                }
            }
            ListResult::Error => shared_q.lock().unwrap().failed = true,
        });
        mainloop.unlock();

        let shared_w = Arc::clone(&shared);
        let waited = wait_until(CONNECT_TIMEOUT, move || {
            let s = shared_w.lock().unwrap();
            if s.ready {
                Some(Ok(()))
            } else if s.failed {
                Some(Err(BackendError::Unavailable(format!(
                    "no such sink: {}",
                    target
                ))))
            } else {
                None
            }
        });
        if let Err(e) = waited {
            teardown(&mut mainloop, &mut context);
            return Err(e);
        }

        let device = {
            let s = shared.lock().unwrap();
            DeviceInfo {
                id: s.name.clone(),
                label: s.description.clone(),
                is_default: s.track_default,
            }
        };
        log::info!("pulse: controlling sink {} ({})", device.id, device.label);

        Ok(Self {
            mainloop,
            context,
            shared,
            device,
            subscribed: false,
            released: false,
        })
    }
}

impl BackendAdapter for PulseBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PulseAudio
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn volume(&mut self) -> BackendResult<u16> {
        let s = self.shared.lock().unwrap();
        if s.gone {
            return Err(BackendError::DeviceGone(s.name.clone()));
        }
        Ok(s.percent)
    }

    fn set_volume(&mut self, percent: u16) -> BackendResult<()> {
        let (index, channels) = {
            let s = self.shared.lock().unwrap();
            if s.gone {
                return Err(BackendError::DeviceGone(s.name.clone()));
            }
            (s.index, s.channels)
        };
        let mut volumes = ChannelVolumes::default();
        volumes.set(channels, percent_to_volume(percent));

        self.mainloop.lock();
        let mut introspect = self.context.introspect();
        introspect.set_sink_volume_by_index(index, &volumes, None);
        self.mainloop.unlock();

        // Mirror immediately; the subscription echo will match and stay quiet.
        self.shared.lock().unwrap().percent = percent.min(VOLUME_OVERSHOOT_MAX);
        Ok(())
    }

    fn muted(&mut self) -> BackendResult<bool> {
        let s = self.shared.lock().unwrap();
        if s.gone {
            return Err(BackendError::DeviceGone(s.name.clone()));
        }
        Ok(s.muted)
    }

    fn set_mute(&mut self, muted: bool) -> BackendResult<()> {
        let index = {
            let s = self.shared.lock().unwrap();
            if s.gone {
                return Err(BackendError::DeviceGone(s.name.clone()));
            }
            s.index
        };
        self.mainloop.lock();
        let mut introspect = self.context.introspect();
        introspect.set_sink_mute_by_index(index, muted, None);
        self.mainloop.unlock();

        self.shared.lock().unwrap().muted = muted;
        Ok(())
    }

    fn subscribe(&mut self, callback: ChangeCallback) -> BackendResult<()> {
        self.shared.lock().unwrap().callback = Some(Arc::new(callback));
        if self.subscribed {
            // Replacing the consumer is enough; the native subscription stays.
            return Ok(());
        }

        let shared_ev = Arc::clone(&self.shared);

        self.mainloop.lock();
        let introspect = self.context.introspect();
        self.context
            .set_subscribe_callback(Some(Box::new(move |facility, operation, index| {
                handle_subscribe_event(&shared_ev, &introspect, facility, operation, index);
            })));
        self.context
            .subscribe(InterestMaskSet::SINK | InterestMaskSet::SERVER, |_| {});
        self.mainloop.unlock();

        self.subscribed = true;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.lock().unwrap().callback = None;
        self.mainloop.lock();
        self.context.set_subscribe_callback(None);
        self.context.disconnect();
        self.mainloop.unlock();
        self.mainloop.stop();
    }
}

impl Drop for PulseBackend {
    fn drop(&mut self) {
        self.release();
    }
}

/// Enumerate output sinks, marking the server default
pub(crate) fn list_devices() -> BackendResult<Vec<DeviceInfo>> {
    #[derive(Default)]
    struct Scan {
        sinks: Vec<(String, String)>,
        default_name: Option<String>,
        sinks_done: bool,
        server_done: bool,
        failed: bool,
    }

    let (mut mainloop, mut context) = connect()?;
    let scan = Arc::new(Mutex::new(Scan::default()));

    mainloop.lock();
    let introspect = context.introspect();
    let scan_server = Arc::clone(&scan);
    introspect.get_server_info(move |info| {
        let mut s = scan_server.lock().unwrap();
        s.default_name = info.default_sink_name.as_ref().map(|n| n.to_string());
        s.server_done = true;
    });
    let scan_sinks = Arc::clone(&scan);
    introspect.get_sink_info_list(move |res| match res {
        ListResult::Item(info) => {
            let name = info.name.as_ref().map(|n| n.to_string()).unwrap_or_default();
            let description = info
                .description
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_else(|| name.clone());
            scan_sinks.lock().unwrap().sinks.push((name, description));
        }
        ListResult::End => scan_sinks.lock().unwrap().sinks_done = true,
        ListResult::Error => scan_sinks.lock().unwrap().failed = true,
    });
    mainloop.unlock();

    let scan_wait = Arc::clone(&scan);
    let waited = wait_until(CONNECT_TIMEOUT, move || {
        let s = scan_wait.lock().unwrap();
        if s.failed {
            Some(Err(BackendError::Unavailable(
                "sink enumeration failed".to_string(),
            )))
        } else if s.sinks_done && s.server_done {
            Some(Ok(()))
        } else {
            None
        }
    });
    teardown(&mut mainloop, &mut context);
    waited?;

    let scan = scan.lock().unwrap();
    Ok(scan
        .sinks
        .iter()
        .map(|(name, description)| DeviceInfo {
            id: name.clone(),
            label: description.clone(),
            is_default: scan.default_name.as_deref() == Some(name.as_str()),
        })
        .collect())
}

/// Bring up a connected, Ready context on a running threaded mainloop
fn connect() -> BackendResult<(Mainloop, Context)> {
    let mut mainloop = Mainloop::new()
        .ok_or_else(|| BackendError::Unavailable("cannot create mainloop".to_string()))?;
    let mut context = Context::new(&mainloop, "panvol")
        .ok_or_else(|| BackendError::Unavailable("cannot create context".to_string()))?;
    context
        .connect(None, FlagSet::NOFLAGS, None)
        .map_err(|e| BackendError::Unavailable(format!("connect: {}", e)))?;
    mainloop
        .start()
        .map_err(|e| BackendError::Unavailable(format!("mainloop start: {}", e)))?;

    let waited = wait_until(CONNECT_TIMEOUT, || {
        mainloop.lock();
        let state = context.get_state();
        mainloop.unlock();
        match state {
            State::Ready => Some(Ok(())),
            State::Failed | State::Terminated => Some(Err(BackendError::Unavailable(
                "PulseAudio connection failed".to_string(),
            ))),
            _ => None,
        }
    });
    if let Err(e) = waited {
        teardown(&mut mainloop, &mut context);
        return Err(e);
    }
    Ok((mainloop, context))
}

fn teardown(mainloop: &mut Mainloop, context: &mut Context) {
    mainloop.lock();
    context.disconnect();
    mainloop.unlock();
    mainloop.stop();
}

/// Poll `f` until it resolves or the deadline passes
fn wait_until<F>(timeout: Duration, mut f: F) -> BackendResult<()>
where
    F: FnMut() -> Option<BackendResult<()>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(result) = f() {
            return result;
        }
        if Instant::now() >= deadline {
            return Err(BackendError::Unavailable(
                "PulseAudio did not respond in time".to_string(),
            ));
        }
        thread::sleep(WAIT_SLICE);
    }
}

/// Runs on the mainloop thread for every subscribed server event
fn handle_subscribe_event(
    shared: &Arc<Mutex<SinkShared>>,
    introspect: &Introspector,
    facility: Option<Facility>,
    operation: Option<SinkOp>,
    index: u32,
) {
    let (target, track_default, gone) = {
        let s = shared.lock().unwrap();
        (s.index, s.track_default, s.gone)
    };
    if gone {
        return;
    }
    match facility {
        Some(Facility::Sink) => match operation {
            Some(SinkOp::Removed) if index == target => {
                let callback = {
                    let mut s = shared.lock().unwrap();
                    s.gone = true;
                    s.callback.clone()
                };
                if let Some(cb) = callback {
                    (*cb)(ChangeEvent::DeviceGone);
                }
            }
            Some(SinkOp::Changed) if index == target => {
                let shared_q = Arc::clone(shared);
                introspect.get_sink_info_by_index(index, move |res| {
                    if let ListResult::Item(info) = res {
                        apply_sink_info(&shared_q, info, true);
                    }
                });
            }
            _ => {}
        },
        // A server event may mean the default sink moved under us.
        Some(Facility::Server) if track_default => {
            let shared_q = Arc::clone(shared);
            introspect.get_sink_info_by_name(DEFAULT_SINK, move |res| {
                if let ListResult::Item(info) = res {
                    apply_sink_info(&shared_q, info, true);
                }
            });
        }
        _ => {}
    }
}

fn apply_sink_info(shared: &Arc<Mutex<SinkShared>>, info: &SinkInfo, notify: bool) {
    let percent = volume_to_percent(info.volume.avg());
    let muted = info.mute;
    let (changed, callback) = {
        let mut s = shared.lock().unwrap();
        s.index = info.index;
        s.channels = info.volume.len();
        if let Some(name) = info.name.as_ref() {
            s.name = name.to_string();
        }
        if let Some(description) = info.description.as_ref() {
            s.description = description.to_string();
        }
        let changed = s.percent != percent || s.muted != muted;
        s.percent = percent;
        s.muted = muted;
        s.ready = true;
        (changed, s.callback.clone())
    };
    if notify && changed {
        if let Some(cb) = callback {
            (*cb)(ChangeEvent::VolumeChanged { percent, muted });
        }
    }
}

fn volume_to_percent(volume: Volume) -> u16 {
    let norm = u64::from(Volume::NORMAL.0);
    let percent = (u64::from(volume.0) * 100 + norm / 2) / norm;
    percent.min(u64::from(VOLUME_OVERSHOOT_MAX)) as u16
}

fn percent_to_volume(percent: u16) -> Volume {
    let norm = u64::from(Volume::NORMAL.0);
    Volume((u64::from(percent) * norm / 100) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_conversion_round_trips() {
        for percent in [0u16, 1, 50, 100, 120, 150] {
            assert_eq!(volume_to_percent(percent_to_volume(percent)), percent);
        }
    }

    #[test]
    fn test_overshoot_maps_past_normal() {
        assert!(percent_to_volume(150).0 > Volume::NORMAL.0);
        assert_eq!(percent_to_volume(150).0, Volume::NORMAL.0 / 2 * 3);
    }

    #[test]
    fn test_reads_clamp_to_overshoot_ceiling() {
        let absurd = Volume(Volume::NORMAL.0.saturating_mul(4));
        assert_eq!(volume_to_percent(absurd), VOLUME_OVERSHOOT_MAX);
    }
}
