//! The socket adapter (spec C8), grounded on
//! `examples/original_source/include/xtils/system/unix_socket.h`'s
//! `UnixSocket`: binds a [`RawSocket`] to a task runner's FD watch,
//! implements the non-blocking state machine, and dispatches
//! [`SocketListener`] callbacks.
//!
//! The original captures a weak pointer to `this` in every callback posted
//! to the loop, so the callback becomes a no-op once `this` is destroyed.
//! Idiomatic Rust has no aliased raw `this` to weaken: every notification
//! closure here instead owns an `Arc<dyn SocketListener>` clone plus a
//! clone of the socket's `alive: Arc<AtomicBool>` flag, and checks `alive`
//! before calling the listener — the same "silently become a no-op after
//! destruction" guarantee, without a pointer that could dangle.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};

use reactor_common::error::CoreError;
use reactor_runtime::TaskRunner;

use crate::address::{SockFamily, SockType};
use crate::raw_socket::RawSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Connected,
    Listening,
}

/// Non-owning listener interface; default methods are no-ops so
/// implementors only override what they need, matching the original's
/// virtual-with-default-body `EventListener`.
pub trait SocketListener: Send + Sync {
    fn on_new_incoming_connection(&self, new_connection: Socket) {
        let _ = new_connection;
    }
    fn on_connect(&self, connected: bool) {
        let _ = connected;
    }
    fn on_disconnect(&self) {}
    fn on_data_available(&self) {}
}

struct Inner {
    /// `None` once [`Socket::release`] has taken the descriptor out for a
    /// hand-off to a fresh `Socket`/listener pair; every other method is
    /// only ever called through a `Socket` that still holds a live `Inner`,
    /// so a released `Inner` is never touched again.
    raw: Mutex<Option<RawSocket>>,
    runner: Arc<dyn TaskRunner>,
    listener: Arc<dyn SocketListener>,
    state: Mutex<SocketState>,
    alive: Arc<AtomicBool>,
    fd: RawFd,
}

/// A non-blocking socket bound to an event loop watch. Uniquely owned:
/// dropping it guarantees no further listener callback fires.
pub struct Socket {
    inner: Arc<Inner>,
}

impl Socket {
    pub fn listen(
        addr: &str,
        family: SockFamily,
        ty: SockType,
        runner: Arc<dyn TaskRunner>,
        listener: Arc<dyn SocketListener>,
        backlog: i32,
    ) -> Result<Socket, CoreError> {
        let raw = RawSocket::create(family, ty).map_err(CoreError::Broken)?;
        raw.bind(addr)?;
        raw.listen(backlog)?;
        let fd = raw.as_raw_fd();
        let inner = Arc::new(Inner {
            raw: Mutex::new(Some(raw)),
            runner,
            listener,
            state: Mutex::new(SocketState::Listening),
            alive: Arc::new(AtomicBool::new(true)),
            fd,
        });
        register_watch(&inner).map_err(CoreError::Broken)?;
        Ok(Socket { inner })
    }

    pub fn connect(
        addr: &str,
        family: SockFamily,
        ty: SockType,
        runner: Arc<dyn TaskRunner>,
        listener: Arc<dyn SocketListener>,
    ) -> io::Result<Socket> {
        let raw = RawSocket::create(family, ty)?;
        let fd = raw.as_raw_fd();
        let connect_result = raw.connect(addr);
        let state = match &connect_result {
            Ok(true) => SocketState::Connected,
            Ok(false) => SocketState::Connecting,
            Err(_) => SocketState::Disconnected,
        };
        let inner = Arc::new(Inner {
            raw: Mutex::new(Some(raw)),
            runner,
            listener,
            state: Mutex::new(state),
            alive: Arc::new(AtomicBool::new(true)),
            fd,
        });

        match connect_result {
            Ok(true) => {
                register_watch(&inner)?;
                notify_connect(&inner, true);
            }
            Ok(false) => {
                register_watch(&inner)?;
            }
            Err(_) => {
                notify_connect(&inner, false);
            }
        }
        Ok(Socket { inner })
    }

    /// Wraps an already-connected [`RawSocket`] (an accepted connection, or
    /// one just released from another `Socket`) under `listener`. Public so
    /// a protocol layer on top of C8 can give each accepted connection its
    /// own dedicated listener instead of inheriting the listening socket's,
    /// which `SocketListener`'s connection-less callback signatures can't
    /// otherwise distinguish between.
    pub fn adopt_connected(raw: RawSocket, runner: Arc<dyn TaskRunner>, listener: Arc<dyn SocketListener>) -> Socket {
        let fd = raw.as_raw_fd();
        let inner = Arc::new(Inner {
            raw: Mutex::new(Some(raw)),
            runner,
            listener,
            state: Mutex::new(SocketState::Connected),
            alive: Arc::new(AtomicBool::new(true)),
            fd,
        });
        if let Err(e) = register_watch(&inner) {
            tracing::warn!(error = %e, "failed to watch accepted socket");
        }
        Socket { inner }
    }

    /// Tears down this adapter's watch and listener binding without closing
    /// the underlying descriptor, handing it back so the caller can
    /// re-adopt it (typically via [`Socket::adopt_connected`]) under a
    /// different listener. Grounded on the original's
    /// `UnixSocket::ReleaseFd`, used there to hand a raw accepted
    /// connection off to `HttpServerConnection` owners.
    pub fn release(mut self) -> RawSocket {
        self.inner.alive.store(false, SeqCst);
        self.inner.runner.remove_file_descriptor_watch(self.inner.fd);
        self.inner.raw.lock().unwrap().take().expect("socket already released")
    }

    /// Queues `buf` for send; returns `false` without side effects if the
    /// socket isn't connected. On I/O failure, shuts down (notifying) and
    /// returns `false`.
    pub fn send(&self, buf: &[u8]) -> bool {
        if *self.inner.state.lock().unwrap() != SocketState::Connected {
            return false;
        }
        let result = self.inner.raw.lock().unwrap().as_mut().unwrap().send_all_blocking(buf);
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "send failed, shutting down");
                self.shutdown(true);
                false
            }
        }
    }

    /// Returns the number of bytes read (0 on clean peer close, which also
    /// triggers `OnDisconnect`, or if nothing is available right now).
    pub fn receive(&self, buf: &mut [u8]) -> usize {
        let result = self.inner.raw.lock().unwrap().as_mut().unwrap().recv(buf);
        match result {
            Ok(0) => {
                self.shutdown(true);
                0
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                tracing::debug!(error = %e, "receive failed, shutting down");
                self.shutdown(true);
                0
            }
        }
    }

    /// Tears the connection down. If `notify`, posts a task (run on the
    /// owning runner) to fire `OnDisconnect` (previous state `Connected`)
    /// or `OnConnect(false)` (previous state `Connecting`).
    pub fn shutdown(&self, notify: bool) {
        let prev_state = {
            let mut state = self.inner.state.lock().unwrap();
            std::mem::replace(&mut *state, SocketState::Disconnected)
        };
        self.inner.runner.remove_file_descriptor_watch(self.inner.fd);
        if let Some(raw) = self.inner.raw.lock().unwrap().as_mut() {
            raw.shutdown();
        }

        if !notify {
            return;
        }
        match prev_state {
            SocketState::Connected => {
                let listener = self.inner.listener.clone();
                let alive = self.inner.alive.clone();
                self.inner.runner.post_task(Box::new(move || {
                    if alive.load(SeqCst) {
                        listener.on_disconnect();
                    }
                }));
            }
            SocketState::Connecting => notify_connect(&self.inner, false),
            SocketState::Disconnected | SocketState::Listening => {}
        }
    }

    /// Like [`Self::send`], but passes `fds` as `SCM_RIGHTS` ancillary data
    /// (Unix stream/seqpacket sockets only).
    pub fn send_with_fds(&self, buf: &[u8], fds: &[RawFd]) -> bool {
        if *self.inner.state.lock().unwrap() != SocketState::Connected {
            return false;
        }
        match self.inner.raw.lock().unwrap().as_ref().unwrap().send_with_fds(buf, fds) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "send_with_fds failed, shutting down");
                self.shutdown(true);
                false
            }
        }
    }

    /// Like [`Self::receive`], but also collects up to `out_fds.len()`
    /// ancillary descriptors. Returns `(bytes_read, fds_received)`.
    pub fn receive_with_fds(&self, buf: &mut [u8], out_fds: &mut [RawFd]) -> (usize, usize) {
        let result = self.inner.raw.lock().unwrap().as_ref().unwrap().recv_with_fds(buf, out_fds);
        match result {
            Ok((0, _)) => {
                self.shutdown(true);
                (0, 0)
            }
            Ok((n, nfds)) => (n, nfds),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => (0, 0),
            Err(e) => {
                tracing::debug!(error = %e, "receive_with_fds failed, shutting down");
                self.shutdown(true);
                (0, 0)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.state.lock().unwrap() == SocketState::Connected
    }

    pub fn is_listening(&self) -> bool {
        *self.inner.state.lock().unwrap() == SocketState::Listening
    }

    pub fn family(&self) -> SockFamily {
        self.inner.raw.lock().unwrap().as_ref().unwrap().family()
    }

    pub fn fd(&self) -> RawFd {
        self.inner.fd
    }

    pub fn local_addr_string(&self) -> String {
        self.inner.raw.lock().unwrap().as_ref().unwrap().local_addr_string()
    }

    pub fn peer_addr_string(&self) -> String {
        self.inner.raw.lock().unwrap().as_ref().unwrap().peer_addr_string()
    }
}

fn notify_connect(inner: &Arc<Inner>, connected: bool) {
    let listener = inner.listener.clone();
    let alive = inner.alive.clone();
    inner.runner.post_task(Box::new(move || {
        if alive.load(SeqCst) {
            listener.on_connect(connected);
        }
    }));
}

fn register_watch(inner: &Arc<Inner>) -> io::Result<()> {
    let watched = inner.clone();
    inner.runner.add_file_descriptor_watch(inner.fd, Box::new(move || on_event(&watched)))
}

fn on_event(inner: &Arc<Inner>) {
    let state = *inner.state.lock().unwrap();
    match state {
        SocketState::Listening => drain_accepts(inner),
        SocketState::Connecting => probe_connecting(inner),
        SocketState::Connected => {
            if inner.alive.load(SeqCst) {
                inner.listener.on_data_available();
            }
        }
        SocketState::Disconnected => {}
    }
}

fn drain_accepts(inner: &Arc<Inner>) {
    loop {
        let accepted = inner.raw.lock().unwrap().as_mut().unwrap().accept();
        match accepted {
            Ok(Some(raw_child)) => {
                let child = Socket::adopt_connected(raw_child, inner.runner.clone(), inner.listener.clone());
                inner.listener.on_new_incoming_connection(child);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn probe_connecting(inner: &Arc<Inner>) {
    match inner.raw.lock().unwrap().as_ref().unwrap().take_error() {
        Ok(()) => {
            *inner.state.lock().unwrap() = SocketState::Connected;
            notify_connect(inner, true);
        }
        Err(CoreError::Broken(e)) if e.raw_os_error() == Some(libc::EINPROGRESS) => {
            // Spurious wakeup before the connect attempt has resolved.
        }
        Err(_) => {
            *inner.state.lock().unwrap() = SocketState::Disconnected;
            notify_connect(inner, false);
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.inner.alive.store(false, SeqCst);
        self.inner.runner.remove_file_descriptor_watch(self.inner.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_runtime::ThreadTaskRunner;
    use std::sync::mpsc::{Sender, channel};

    struct RecordingListener {
        connected: Sender<bool>,
        data_available: Sender<()>,
    }

    impl SocketListener for RecordingListener {
        fn on_connect(&self, connected: bool) {
            let _ = self.connected.send(connected);
        }
        fn on_data_available(&self) {
            let _ = self.data_available.send(());
        }
    }

    struct AcceptingListener {
        accepted: Mutex<Vec<Socket>>,
        got_one: Sender<()>,
    }

    impl SocketListener for AcceptingListener {
        fn on_new_incoming_connection(&self, new_connection: Socket) {
            self.accepted.lock().unwrap().push(new_connection);
            let _ = self.got_one.send(());
        }
    }

    fn abstract_addr() -> String {
        format!("@reactor-socket-test-{}-{}", std::process::id(), fastrand_like())
    }

    fn fastrand_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
    }

    #[test]
    fn connect_to_listening_socket_notifies_both_sides() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("socket-test"));
        let addr = abstract_addr();

        let (got_one_tx, got_one_rx) = channel();
        let server_listener = Arc::new(AcceptingListener { accepted: Mutex::new(Vec::new()), got_one: got_one_tx });
        let _server = Socket::listen(&addr, SockFamily::Unix, SockType::Stream, runner.clone(), server_listener, 16)
            .unwrap();

        let (connected_tx, connected_rx) = channel();
        let (data_tx, _data_rx) = channel();
        let client_listener = Arc::new(RecordingListener { connected: connected_tx, data_available: data_tx });
        let client = Socket::connect(&addr, SockFamily::Unix, SockType::Stream, runner, client_listener).unwrap();

        assert!(connected_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap());
        got_one_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        drop(client);
    }

    #[test]
    fn data_sent_triggers_on_data_available() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("socket-data-test"));
        let addr = abstract_addr();

        let (got_one_tx, got_one_rx) = channel();
        let server_listener = Arc::new(AcceptingListener { accepted: Mutex::new(Vec::new()), got_one: got_one_tx });
        let _server = Socket::listen(&addr, SockFamily::Unix, SockType::Stream, runner.clone(), server_listener.clone(), 16)
            .unwrap();

        let (connected_tx, connected_rx) = channel();
        let (data_tx, data_rx) = channel();
        let client_listener = Arc::new(RecordingListener { connected: connected_tx, data_available: data_tx });
        let client = Socket::connect(&addr, SockFamily::Unix, SockType::Stream, runner, client_listener).unwrap();
        assert!(connected_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap());
        got_one_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();

        assert!(client.send(b"ping"));
        data_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();

        let accepted = server_listener.accepted.lock().unwrap();
        let server_side = &accepted[0];
        let mut buf = [0u8; 16];
        let n = server_side.receive(&mut buf);
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn connect_refused_notifies_false() {
        let runner: Arc<dyn TaskRunner> = Arc::new(ThreadTaskRunner::create_and_start("socket-refuse-test"));
        let (connected_tx, connected_rx) = channel();
        let (data_tx, _data_rx) = channel();
        let listener = Arc::new(RecordingListener { connected: connected_tx, data_available: data_tx });
        let _client =
            Socket::connect("127.0.0.1:1", SockFamily::Inet, SockType::Stream, runner, listener).unwrap();
        let connected = connected_rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert!(!connected);
    }
}
