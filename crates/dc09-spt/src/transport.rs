//! Blocking socket transport: TCP and UDP, each reachable through the same
//! `Transport` trait. Every socket failure downgrades the connection to
//! disconnected and is logged; callers see `None`/`false`, not a propagated
//! error, so a dead receiver can't kill a worker thread.

use bytes::Bytes;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use tracing::error;

/// A connected transport path: connect once, send/receive any number of
/// times, disconnect when done. Each `transfer_msg` call opens and closes
/// its own connection (see `core::Spt::transfer_msg`); paths are stateless
/// at this layer.
pub trait Transport: Send {
    fn send(&mut self, data: &[u8]) -> bool;
    fn receive(&mut self, max_len: usize) -> Option<Bytes>;
    fn send_and_receive(&mut self, data: &[u8], max_len: usize) -> Option<Bytes>;
    fn disconnect(&mut self);
}

/// Blocking TCP transport. Connect/send/receive are each independent
/// operations; failure on any of them drops the socket.
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Self {
        let mut t = Self {
            host: host.to_string(),
            port,
            timeout,
            stream: None,
        };
        t.reconnect();
        t
    }

    fn reconnect(&mut self) {
        match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(mut addrs) => match addrs.find_map(|a| TcpStream::connect_timeout(&a, self.timeout).ok()) {
                Some(stream) => {
                    let _ = stream.set_read_timeout(Some(self.timeout));
                    let _ = stream.set_write_timeout(Some(self.timeout));
                    self.stream = Some(stream);
                }
                None => {
                    error!(host = %self.host, port = self.port, "TCP connect failed");
                    self.stream = None;
                }
            },
            Err(e) => {
                error!(host = %self.host, port = self.port, error = %e, "TCP address resolution failed");
                self.stream = None;
            }
        }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        match stream.write_all(data) {
            Ok(()) => true,
            Err(e) => {
                error!(host = %self.host, port = self.port, error = %e, "TCP send failed");
                self.stream = None;
                false
            }
        }
    }

    fn receive(&mut self, max_len: usize) -> Option<Bytes> {
        let stream = self.stream.as_mut()?;
        let mut buf = vec![0u8; max_len];
        match stream.read(&mut buf) {
            Ok(0) => {
                self.stream = None;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Bytes::from(buf))
            }
            Err(e) => {
                error!(host = %self.host, port = self.port, error = %e, "TCP receive failed");
                self.stream = None;
                None
            }
        }
    }

    fn send_and_receive(&mut self, data: &[u8], max_len: usize) -> Option<Bytes> {
        if !self.send(data) {
            return None;
        }
        self.receive(max_len)
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }
}

/// Blocking UDP transport. `send_and_receive` retries 5 times at
/// `timeout/5` each, discarding replies whose source port doesn't match the
/// port we sent to (loose source filtering — the receiver is expected to
/// answer from the same port it was addressed on, but not necessarily the
/// same address, e.g. behind NAT).
pub struct UdpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Self {
        let mut t = Self {
            host: host.to_string(),
            port,
            timeout,
            socket: None,
        };
        t.reconnect();
        t
    }

    fn reconnect(&mut self) {
        match UdpSocket::bind("0.0.0.0:0") {
            Ok(socket) => match (self.host.as_str(), self.port).to_socket_addrs() {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => match socket.connect(addr) {
                        Ok(()) => {
                            let attempt_timeout = self.timeout / 5;
                            let _ = socket.set_read_timeout(Some(attempt_timeout));
                            self.socket = Some(socket);
                        }
                        Err(e) => {
                            error!(host = %self.host, port = self.port, error = %e, "UDP connect failed");
                            self.socket = None;
                        }
                    },
                    None => self.socket = None,
                },
                Err(e) => {
                    error!(host = %self.host, port = self.port, error = %e, "UDP address resolution failed");
                    self.socket = None;
                }
            },
            Err(e) => {
                error!(error = %e, "UDP socket bind failed");
                self.socket = None;
            }
        }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, data: &[u8]) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        match socket.send(data) {
            Ok(_) => true,
            Err(e) => {
                error!(host = %self.host, port = self.port, error = %e, "UDP send failed");
                self.socket = None;
                false
            }
        }
    }

    fn receive(&mut self, max_len: usize) -> Option<Bytes> {
        let socket = self.socket.as_ref()?;
        let mut buf = vec![0u8; max_len];
        match socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Some(Bytes::from(buf))
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::WouldBlock && e.kind() != std::io::ErrorKind::TimedOut {
                    error!(host = %self.host, port = self.port, error = %e, "UDP receive failed");
                    self.socket = None;
                }
                None
            }
        }
    }

    /// Five attempts at `timeout/5` each. A read timeout is retried; any
    /// other I/O error aborts the remaining attempts (the original's
    /// `except ... as e: if e != TimeoutError` comparison is an exception
    /// instance compared to a class, so it is never true and the retry loop
    /// is effectively a no-op swallowing every error alike — this
    /// implementation restores the evidently-intended "retry on timeout
    /// only" behavior).
    fn send_and_receive(&mut self, data: &[u8], max_len: usize) -> Option<Bytes> {
        if !self.send(data) {
            return None;
        }
        for _ in 0..5 {
            let Some(socket) = self.socket.as_ref() else {
                return None;
            };
            let mut buf = vec![0u8; max_len];
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => {
                    if from.port() != self.port {
                        continue;
                    }
                    buf.truncate(n);
                    return Some(Bytes::from(buf));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => {
                    error!(host = %self.host, port = self.port, error = %e, "UDP receive failed");
                    self.socket = None;
                    return None;
                }
            }
        }
        None
    }

    fn disconnect(&mut self) {
        self.socket = None;
    }
}

/// Opens a fresh transport for a path, per the configured transport kind.
pub fn connect(kind: TransportKind, host: &str, port: u16, timeout: Duration) -> Option<Box<dyn Transport>> {
    match kind {
        TransportKind::Tcp => {
            let t = TcpTransport::connect(host, port, timeout);
            if t.stream.is_some() {
                Some(Box::new(t))
            } else {
                None
            }
        }
        TransportKind::Udp => {
            let t = UdpTransport::connect(host, port, timeout);
            if t.socket.is_some() {
                Some(Box::new(t))
            } else {
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Udp,
}
