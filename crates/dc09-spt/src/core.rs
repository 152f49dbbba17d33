//! The SPT core: path lattice, message counter, send queue, and the public
//! API surface (`set_path`, `send_msg`, `start_poll`, `state`, ...).

use crate::codec::{AckStatus, BlockCodec};
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::msg::{dc03_event, dc05_event, dc09_extra, EventType, MessageParams};
use crate::path::{Branch, PathEntry, PathTable, Slot};
use crate::poller;
use crate::transport::{self, TransportKind};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub(crate) struct Identity {
    pub account: Option<String>,
    pub receiver: Option<u32>,
    pub line: Option<u32>,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub msg_nr: u16,
    pub sent: u64,
}

pub(crate) struct QueueEntry {
    pub msg_nr: u16,
    pub event_type: EventType,
    pub payload: String,
}

pub type Callback = Box<dyn Fn(&str, &MessageParams) + Send + Sync>;

/// State shared between the `Spt` handle, the dispatcher thread and the
/// poller thread. Three locks guard disjoint concerns: `paths` (the
/// lattice), `queue` (FIFO send queue; the dispatcher self-terminates once
/// it empties and `enqueue` respawns it on the next message rather than
/// parking it on a condvar), and `counters` (message numbering). A fourth,
/// `identity`, guards the rarely-changed account / receiver / line triple.
pub(crate) struct Shared {
    pub identity: Mutex<Identity>,
    pub paths: Mutex<PathTable>,
    pub queue: Mutex<VecDeque<QueueEntry>>,
    pub counters: Mutex<Counters>,
    pub callback: Mutex<Option<Callback>>,
    pub(crate) dispatcher: Mutex<Option<dispatcher::DispatcherHandle>>,
    pub(crate) poller: Mutex<Option<poller::PollerHandle>>,
}

/// A Secured Premises Transceiver: the panel-side endpoint of the DC-09
/// protocol. Cloning an `Spt` is cheap and shares the same engine (it is a
/// thin `Arc` wrapper), matching the original's single shared instance used
/// from multiple threads.
#[derive(Clone)]
pub struct Spt {
    pub(crate) shared: Arc<Shared>,
}

impl Spt {
    pub fn new(account: impl Into<String>, receiver: Option<u32>, line: Option<u32>) -> Self {
        let shared = Arc::new(Shared {
            identity: Mutex::new(Identity {
                account: Some(account.into()),
                receiver,
                line,
            }),
            paths: Mutex::new(PathTable::default()),
            queue: Mutex::new(VecDeque::new()),
            counters: Mutex::new(Counters::default()),
            callback: Mutex::new(None),
            dispatcher: Mutex::new(None),
            poller: Mutex::new(None),
        });
        Self { shared }
    }

    /// Configures one of the four path slots. Resets that slot's `ok` to 0.
    #[allow(clippy::too_many_arguments)]
    pub fn set_path(
        &self,
        branch: Branch,
        slot: Slot,
        host: impl Into<String>,
        port: u16,
        account: Option<String>,
        key: Option<Vec<u8>>,
        receiver: Option<u32>,
        line: Option<u32>,
        transport: TransportKind,
        timeout: Duration,
    ) -> Result<()> {
        let mut identity = self.shared.identity.lock().unwrap();
        let acc = match account {
            Some(a) => {
                if identity.account.is_none() {
                    identity.account = Some(a.clone());
                }
                a
            }
            None => identity
                .account
                .clone()
                .ok_or_else(|| Error::Configuration("no account configured".into()))?,
        };
        let rec = receiver.or(identity.receiver);
        if receiver.is_some() && identity.receiver.is_none() {
            identity.receiver = receiver;
        }
        let lin = line.or(identity.line);
        if line.is_some() && identity.line.is_none() {
            identity.line = line;
        }
        drop(identity);

        if let Some(k) = &key {
            if k.len() != 16 && k.len() != 32 {
                return Err(Error::Configuration(format!(
                    "key length is {} but must be either 16 or 32",
                    k.len()
                )));
            }
        }
        let entry = PathEntry::new(host, port, acc, transport, timeout, key, rec, lin);
        self.shared.paths.lock().unwrap().set(branch, slot, entry);
        Ok(())
    }

    pub fn del_path(&self, branch: Branch, slot: Slot) {
        self.shared.paths.lock().unwrap().clear(branch, slot);
    }

    pub fn set_callback<F>(&self, cb: F)
    where
        F: Fn(&str, &MessageParams) + Send + Sync + 'static,
    {
        *self.shared.callback.lock().unwrap() = Some(Box::new(cb));
    }

    /// Queues an event for sending. `mtype` is `"SIA"`/`"SIA-DCS"` for a
    /// DC-03 payload or `"CID"`/`"ADM-CID"` for a DC-05 payload. Starts the
    /// dispatcher if it isn't already running.
    pub fn send_msg(&self, mtype: &str, params: &MessageParams) -> Result<()> {
        enqueue(&self.shared, mtype, params)
    }

    pub fn start_poll(
        &self,
        main_interval: Option<Duration>,
        backup_interval: Option<Duration>,
        retry_delay: Duration,
        ok_msg: Option<MessageParams>,
        fail_msg: Option<MessageParams>,
    ) {
        poller::start_poll(&self.shared, main_interval, backup_interval, retry_delay, ok_msg, fail_msg);
    }

    pub fn stop_poll(&self) {
        poller::stop(&self.shared);
    }

    pub fn start_routine(&self, routines: Vec<MessageParams>) {
        poller::start_routine(&self.shared, routines);
    }

    pub fn state(&self) -> SptState {
        let queued = self.shared.queue.lock().unwrap().len();
        let sent = self.shared.counters.lock().unwrap().sent;
        let paths = self.shared.paths.lock().unwrap();
        let path_state = |b, s| paths.get(b, s).map(|e| e.ok);
        let poll = self.shared.poller.lock().unwrap();
        let (poll_active, poll_count) = match poll.as_ref() {
            Some(p) => (Some(p.active()), Some(p.count())),
            None => (None, None),
        };
        let send_active = self
            .shared
            .dispatcher
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.is_active());
        SptState {
            msgs_queued: queued,
            msgs_sent: sent,
            main_primary_ok: path_state(Branch::Main, Slot::Primary),
            main_secondary_ok: path_state(Branch::Main, Slot::Secondary),
            backup_primary_ok: path_state(Branch::BackUp, Slot::Primary),
            backup_secondary_ok: path_state(Branch::BackUp, Slot::Secondary),
            poll_active,
            poll_count,
            send_active,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.paths.lock().unwrap().iter().any(|(_, _, e)| e.ok > 0)
    }

    pub fn not_sent(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }
}

/// Current status snapshot, mirroring the original's `state()` dictionary.
#[derive(Debug, Clone)]
pub struct SptState {
    pub msgs_queued: usize,
    pub msgs_sent: u64,
    pub main_primary_ok: Option<i8>,
    pub main_secondary_ok: Option<i8>,
    pub backup_primary_ok: Option<i8>,
    pub backup_secondary_ok: Option<i8>,
    pub poll_active: Option<u8>,
    pub poll_count: Option<u64>,
    pub send_active: Option<bool>,
}

/// Builds the payload for `mtype`, allocates the next message number, and
/// enqueues it. Shared by `Spt::send_msg` and the poller's routine/state-
/// change emission, which both need to feed the same queue and counters.
pub(crate) fn enqueue(shared: &Arc<Shared>, mtype: &str, params: &MessageParams) -> Result<()> {
    let account = shared.identity.lock().unwrap().account.clone();
    let (payload, event_type) = match mtype {
        "SIA" | "SIA-DCS" => (dc03_event(account.as_deref(), params)?, EventType::SiaDcs),
        "CID" | "ADM-CID" => (dc05_event(account.as_deref(), params)?, EventType::AdmCid),
        other => return Err(Error::Encoding(format!("unsupported message type {other:?}"))),
    };
    let mut payload = payload;
    let extra = dc09_extra(params);
    if !extra.is_empty() {
        payload.push_str(&extra);
    }

    let msg_nr = {
        let mut c = shared.counters.lock().unwrap();
        c.msg_nr += 1;
        if c.msg_nr > 9999 {
            c.msg_nr = 1;
        }
        c.sent += 1;
        c.msg_nr
    };

    debug!(msg_nr, r#type = mtype, content = %payload, "message queued");
    {
        let mut q = shared.queue.lock().unwrap();
        q.push_back(QueueEntry {
            msg_nr,
            event_type,
            payload,
        });
    }
    dispatcher::ensure_started(shared);
    Ok(())
}

/// Transfers one message over one path slot: open a connection, build the
/// block, send and receive, apply NAK resync if needed, disconnect.
/// Returns true iff the final status is ACK.
///
/// On a NAK the retry rebuilds and reparses using this message's own
/// `msg_nr`, not whatever the caller's global counter has since become —
/// the original used its own running counter here, which is wrong for any
/// message queued behind the one currently being retried.
pub(crate) fn transfer_msg(
    shared: &Arc<Shared>,
    msg_nr: u16,
    event_type: EventType,
    payload: &str,
    branch: Branch,
    slot: Slot,
) -> bool {
    let snapshot = {
        let paths = shared.paths.lock().unwrap();
        paths.get(branch, slot).map(|e| {
            (
                e.host.clone(),
                e.port,
                e.transport,
                e.timeout,
                e.account.clone(),
                e.key.clone(),
                e.receiver,
                e.line,
                e.offset,
            )
        })
    };
    let Some((host, port, kind, timeout, account, key, receiver, line, offset)) = snapshot else {
        return false;
    };

    let codec = match BlockCodec::new(account, key, receiver, line) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "cannot build codec for path");
            return false;
        }
    };

    let Some(mut conn) = transport::connect(kind, &host, port, timeout) else {
        return false;
    };

    let dc09type = event_type.as_dc09_type();
    let block = codec.build_block(msg_nr, dc09type, payload, offset);
    let Some(reply) = conn.send_and_receive(block.as_bytes(), 512) else {
        conn.disconnect();
        return false;
    };
    let reply = String::from_utf8_lossy(reply.as_ref()).into_owned();

    let ack = match codec.parse_ack(msg_nr, &reply) {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(error = %e, "malformed answer");
            conn.disconnect();
            return false;
        }
    };

    let mut final_status = ack.status;
    if let Some(off) = ack.offset_secs {
        if let Some(e) = shared.paths.lock().unwrap().get_mut(branch, slot) {
            e.offset = off;
        }
    }
    if final_status == AckStatus::Nak {
        let retry_offset = ack.offset_secs.unwrap_or(offset);
        let retry_block = codec.build_block(msg_nr, dc09type, payload, retry_offset);
        if conn.send(retry_block.as_bytes()) {
            if let Some(reply2) = conn.receive(1024) {
                let reply2 = String::from_utf8_lossy(reply2.as_ref()).into_owned();
                if let Ok(ack2) = codec.parse_ack(msg_nr, &reply2) {
                    final_status = ack2.status;
                }
            }
        }
    }
    debug!(msg_nr, %dc09type, host = %host, port, ?final_status, "message transfer attempt complete");
    conn.disconnect();
    final_status == AckStatus::Ack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_nr_wraps_from_9999_to_1() {
        let spt = Spt::new("1234", None, None);
        {
            let mut c = spt.shared.counters.lock().unwrap();
            c.msg_nr = 9999;
        }
        let mut p = MessageParams::new();
        p.code = Some("RP".into());
        spt.send_msg("SIA", &p).unwrap();
        assert_eq!(spt.shared.counters.lock().unwrap().msg_nr, 1);
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let spt = Spt::new("1234", None, None);
        let p = MessageParams::new();
        let err = spt.send_msg("BOGUS", &p).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn is_connected_false_with_no_paths() {
        let spt = Spt::new("1234", None, None);
        assert!(!spt.is_connected());
    }

    #[test]
    fn set_path_rejects_bad_key_length() {
        let spt = Spt::new("1234", None, None);
        let err = spt
            .set_path(
                Branch::Main,
                Slot::Primary,
                "localhost",
                12345,
                None,
                Some(vec![0u8; 10]),
                None,
                None,
                TransportKind::Tcp,
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
