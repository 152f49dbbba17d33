//! Send dispatcher: a worker spawned on first `send_msg`, exiting once the
//! queue drains. Each queued message is tried known-good paths first, then
//! every configured path; a message that still can't go out is reinserted
//! at the head and the worker yields before looping again.

use crate::core::{transfer_msg, QueueEntry, Shared};
use crate::path::{Branch, Slot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SEND_RETRY_DELAY: Duration = Duration::from_millis(500);

pub(crate) struct DispatcherHandle {
    active: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

/// Spawns the dispatcher if one isn't already running. Called from
/// `core::enqueue` after every successful `send_msg`.
pub(crate) fn ensure_started(shared: &Arc<Shared>) {
    let mut guard = shared.dispatcher.lock().unwrap();
    if let Some(h) = guard.as_ref() {
        if h.is_active() {
            return;
        }
    }
    let active = Arc::new(AtomicBool::new(true));
    let shared2 = Arc::clone(shared);
    let active2 = Arc::clone(&active);
    let handle = thread::spawn(move || run(shared2, active2));
    *guard = Some(DispatcherHandle {
        active,
        _handle: handle,
    });
}

fn run(shared: Arc<Shared>, active: Arc<AtomicBool>) {
    loop {
        let entry = { shared.queue.lock().unwrap().pop_front() };
        let Some(entry) = entry else {
            break;
        };
        if !try_send(&shared, &entry) {
            shared.queue.lock().unwrap().push_front(entry);
            thread::sleep(SEND_RETRY_DELAY);
        }
    }
    active.store(false, Ordering::Relaxed);
}

/// Phase A: try only paths already known good, in lattice order. Phase B:
/// probe every configured path regardless of `ok`, flipping it to 1 on the
/// first success. Returns false if no path accepted the message.
fn try_send(shared: &Arc<Shared>, entry: &QueueEntry) -> bool {
    let slots: Vec<(Branch, Slot, i8)> = shared
        .paths
        .lock()
        .unwrap()
        .iter()
        .map(|(b, s, e)| (b, s, e.ok))
        .collect();

    for &(branch, slot, ok) in &slots {
        if ok == 1 && transfer_msg(shared, entry.msg_nr, entry.event_type, &entry.payload, branch, slot) {
            return true;
        }
    }

    for &(branch, slot, _) in &slots {
        if transfer_msg(shared, entry.msg_nr, entry.event_type, &entry.payload, branch, slot) {
            if let Some(e) = shared.paths.lock().unwrap().get_mut(branch, slot) {
                e.ok = 1;
            }
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Counters, Identity, Shared};
    use crate::crc::dc09_crc;
    use crate::msg::EventType;
    use crate::path::{PathEntry, PathTable};
    use crate::transport::TransportKind;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;

    /// A loopback listener that reads one block and answers a well-formed
    /// plaintext ACK for whatever `msg_nr` it was sent.
    fn spawn_ack_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else { return };
            let mut buf = [0u8; 512];
            let Ok(n) = stream.read(&mut buf) else { return };
            let block = String::from_utf8_lossy(&buf[..n]);
            let hash = block.find('#').unwrap_or(4);
            let msg_nr: u16 = block[hash - 4..hash].parse_hex().unwrap_or(1);
            let body = format!("\"ACK\"{msg_nr:04X}#1234[]");
            let crc = dc09_crc(body.as_bytes());
            let frame = format!("\n{crc:04X}{:04X}{body}\r", body.len());
            let _ = stream.write_all(frame.as_bytes());
        });
        port
    }

    trait ParseHex {
        fn parse_hex(&self) -> Option<u16>;
    }
    impl ParseHex for str {
        fn parse_hex(&self) -> Option<u16> {
            u16::from_str_radix(self, 16).ok()
        }
    }

    fn bare_shared() -> Arc<Shared> {
        Arc::new(Shared {
            identity: Mutex::new(Identity {
                account: Some("1234".into()),
                receiver: None,
                line: None,
            }),
            paths: Mutex::new(PathTable::default()),
            queue: Mutex::new(VecDeque::new()),
            counters: Mutex::new(Counters::default()),
            callback: Mutex::new(None),
            dispatcher: Mutex::new(None),
            poller: Mutex::new(None),
        })
    }

    fn tcp_path(port: u16) -> PathEntry {
        PathEntry::new("127.0.0.1", port, "1234", TransportKind::Tcp, Duration::from_millis(300), None, None, None)
    }

    #[test]
    fn try_send_fails_over_to_the_next_reachable_path() {
        let shared = bare_shared();
        let secondary_port = spawn_ack_server();
        {
            let mut paths = shared.paths.lock().unwrap();
            // Primary points at a port nothing is listening on.
            paths.set(Branch::Main, Slot::Primary, tcp_path(1));
            paths.set(Branch::Main, Slot::Secondary, tcp_path(secondary_port));
        }
        let entry = QueueEntry {
            msg_nr: 7,
            event_type: EventType::SiaDcs,
            payload: "#1234|Nri1RP]".into(),
        };
        assert!(try_send(&shared, &entry));
        let paths = shared.paths.lock().unwrap();
        assert_eq!(paths.get(Branch::Main, Slot::Primary).unwrap().ok, 0);
        assert_eq!(paths.get(Branch::Main, Slot::Secondary).unwrap().ok, 1);
    }

    #[test]
    fn try_send_prefers_a_known_good_path_over_probing_others() {
        let shared = bare_shared();
        let good_port = spawn_ack_server();
        {
            let mut paths = shared.paths.lock().unwrap();
            let mut good = tcp_path(good_port);
            good.ok = 1;
            paths.set(Branch::Main, Slot::Primary, good);
            // Secondary is reachable only on the wrong port; if it were ever
            // probed in phase A the send would still succeed via phase B, so
            // the real assertion is that no more than one path is touched.
            paths.set(Branch::Main, Slot::Secondary, tcp_path(1));
        }
        let entry = QueueEntry {
            msg_nr: 3,
            event_type: EventType::SiaDcs,
            payload: "#1234|Nri1RP]".into(),
        };
        assert!(try_send(&shared, &entry));
        let paths = shared.paths.lock().unwrap();
        assert_eq!(paths.get(Branch::Main, Slot::Secondary).unwrap().ok, 0);
    }

    #[test]
    fn try_send_returns_false_when_every_path_is_unreachable() {
        let shared = bare_shared();
        {
            let mut paths = shared.paths.lock().unwrap();
            paths.set(Branch::Main, Slot::Primary, tcp_path(1));
        }
        let entry = QueueEntry {
            msg_nr: 1,
            event_type: EventType::SiaDcs,
            payload: "#1234|Nri1RP]".into(),
        };
        assert!(!try_send(&shared, &entry));
    }
}
