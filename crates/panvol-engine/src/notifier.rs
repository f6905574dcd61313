//! Bridges backend change callbacks into the engine's update queue
//!
//! Backend subscriptions deliver on foreign threads (the PulseAudio
//! mainloop, or a backend poll thread). The notifier hands the adapter a
//! callback that only forwards into the engine channel, so the engine
//! thread stays the single place that touches the model.

use crossbeam::channel::Sender;
use panvol_backends::{BackendAdapter, BackendResult};

use crate::command::EngineMsg;

pub(crate) struct ChangeNotifier {
    tx: Sender<EngineMsg>,
}

impl ChangeNotifier {
    pub fn new(tx: Sender<EngineMsg>) -> Self {
        Self { tx }
    }

    /// Subscribe the adapter, marshaling its events into the engine queue
    pub fn attach(&self, adapter: &mut dyn BackendAdapter) -> BackendResult<()> {
        let tx = self.tx.clone();
        adapter.subscribe(Box::new(move |event| {
            if tx.send(EngineMsg::Change(event)).is_err() {
                log::debug!("notifier: engine stopped, dropping change event");
            }
        }))
    }
}
