//! One HTSP connection and its synchronous request/reply protocol.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use sha1::{Digest, Sha1};

use htsp_protocol::requests;
use htsp_protocol::{
    decode_message, encode_frame, ClientError, HtsMsg, HtsValue, PROTOCOL_VERSION,
};

use crate::client::buffer::MessageQueue;
use crate::client::rpc::HtspRpc;
use crate::client::transport::Transport;
use crate::config::ConnectionConfig;

/// What the server announced in its `hello` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    /// Negotiated version: the lower of ours and the server's.
    pub protocol_version: u32,
}

/// An HTSP session over one TCP connection.
///
/// All methods take `&self`, so a session can be shared between a reader
/// thread and request threads behind an `Arc`. Any I/O failure drops the
/// connection; the session never reconnects by itself.
pub struct Session {
    config: ConnectionConfig,
    transport: Mutex<Option<Arc<Transport>>>,
    /// Last sequence number handed out. Never reset.
    sequence: AtomicU32,
    /// Messages read while waiting for an unrelated reply.
    queue: Mutex<MessageQueue>,
    server: Mutex<ServerInfo>,
    challenge: Mutex<Option<Bytes>>,
}

impl Session {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: Mutex::new(None),
            sequence: AtomicU32::new(0),
            queue: Mutex::new(MessageQueue::new()),
            server: Mutex::new(ServerInfo::default()),
            challenge: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Server details from the last successful greeting.
    pub fn server_info(&self) -> ServerInfo {
        self.server.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.lock().is_some()
    }

    /// Open the connection and perform the `hello` greeting.
    ///
    /// Any previous connection is closed first.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.close();

        let addr = self.config.address();
        info!("Connecting to HTSP server {}...", addr);
        let transport = Transport::connect(&addr, self.config.connect_timeout)?;
        *self.transport.lock() = Some(Arc::new(transport));

        let hello = requests::hello(&self.config.client_name, PROTOCOL_VERSION);
        let reply = match self.read_result(hello, false) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Greeting with {} failed: {}", addr, e);
                self.close();
                return Err(ClientError::ConnectionFailed(format!(
                    "{}: greeting failed: {}",
                    addr, e
                )));
            }
        };

        let server_version = reply.get_u32("htspversion").unwrap_or(0);
        let info = ServerInfo {
            name: reply.get_str("servername").unwrap_or_default().to_string(),
            version: reply.get_str("serverversion").unwrap_or_default().to_string(),
            protocol_version: server_version.min(PROTOCOL_VERSION),
        };
        *self.challenge.lock() = reply.get_bin("challenge").cloned();

        info!(
            "Connected to {} {} at {} (protocol version {})",
            info.name, info.version, addr, info.protocol_version
        );
        *self.server.lock() = info;
        Ok(())
    }

    /// Log in. An empty `username` skips authentication entirely.
    ///
    /// The password is only sent as a digest, and only when the server
    /// issued a challenge.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), ClientError> {
        if username.is_empty() {
            debug!("No username configured, skipping authentication");
            return Ok(());
        }

        let digest = match self.challenge.lock().as_ref() {
            Some(challenge) if !password.is_empty() => Some(auth_digest(password, challenge)),
            _ => None,
        };

        let msg = requests::authenticate(username, digest.as_ref().map(|d| &d[..]));
        match self.read_result(msg, true) {
            Ok(_) => {
                info!("Authenticated as {}", username);
                Ok(())
            }
            Err(e) => {
                error!("Authentication as {} failed: {}", username, e);
                Err(e)
            }
        }
    }

    /// Hand out the next sequence number.
    pub fn add_sequence(&self) -> u32 {
        self.sequence
            .fetch_add(1, Ordering::SeqCst)
            .wrapping_add(1)
    }

    /// Encode and write one message.
    pub fn send_message(&self, msg: &HtsMsg) -> Result<(), ClientError> {
        let frame = encode_frame(msg)?;
        let transport = self.transport()?;
        trace!("-> {}", msg.method().unwrap_or("<reply>"));
        transport.send_frame(&frame).inspect_err(|e| {
            error!("Send to {} failed: {}", transport.peer_addr(), e);
            self.drop_transport(&transport);
        })
    }

    /// Read the next message.
    ///
    /// Messages set aside by [`read_result`](Self::read_result) come first.
    /// `Ok(None)` means nothing arrived within `timeout` (or an empty
    /// frame); the caller may simply retry. Transport failures close the
    /// connection. A frame that fails to decode is reported but leaves the
    /// connection intact.
    pub fn read_message(&self, timeout: Option<Duration>) -> Result<Option<HtsMsg>, ClientError> {
        if let Some(msg) = self.queue.lock().pop() {
            return Ok(Some(msg));
        }

        let transport = self.transport()?;
        let body = match transport.read_frame(timeout) {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(e) => {
                if e != ClientError::ConnectionClosed {
                    error!("Read from {} failed: {}", transport.peer_addr(), e);
                }
                self.drop_transport(&transport);
                return Err(e);
            }
        };

        if body.is_empty() {
            return Ok(None);
        }

        let msg = decode_message(body).inspect_err(|e| warn!("Dropping malformed message: {}", e))?;
        trace!("<- {}", msg.method().unwrap_or("<reply>"));
        Ok(Some(msg))
    }

    /// Send `msg` and wait for its reply.
    ///
    /// With `expect_sequence` the message is stamped with a fresh `seq` and
    /// only the reply carrying that `seq` is accepted; anything else read in
    /// the meantime is queued and returned by later reads in arrival order.
    /// Without it, the first message to arrive is the reply.
    ///
    /// A reply with an `error` string or a non-zero `noaccess` is a failure.
    pub fn read_result(&self, msg: HtsMsg, expect_sequence: bool) -> Result<HtsMsg, ClientError> {
        let mut msg = msg;
        let seq = expect_sequence.then(|| {
            let seq = self.add_sequence();
            msg.set("seq", HtsValue::S64(i64::from(seq)));
            seq
        });

        self.send_message(&msg)?;

        let deadline = Instant::now() + self.config.response_timeout;
        let mut stash = MessageQueue::new();
        let mut overflowed = None;
        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    "No reply to {} (seq {:?}) within {:?}",
                    msg.method().unwrap_or_default(),
                    seq,
                    self.config.response_timeout
                );
                break Err(ClientError::Timeout);
            }

            match self.read_message(Some(remaining)) {
                Ok(Some(reply)) => {
                    if seq.is_none() || reply.seq() == seq {
                        break Ok(reply);
                    }
                    if let Err(rejected) = stash.try_push(reply) {
                        error!("Too many messages while awaiting seq {:?}", seq);
                        overflowed = Some(rejected);
                        break Err(ClientError::QueueOverflow(stash.len()));
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => break Err(e),
                Err(_) => {}
            }
        };

        if !stash.is_empty() || overflowed.is_some() {
            debug!("Re-queueing {} messages read while awaiting a reply", stash.len());
            let mut queue = self.queue.lock();
            if let Some(msg) = overflowed {
                queue.push_front(msg);
            }
            queue.prepend(stash);
        }

        let reply = result?;
        check_reply(&reply)?;
        Ok(reply)
    }

    /// [`read_result`](Self::read_result), discarding the reply body.
    pub fn read_success(&self, msg: HtsMsg, expect_sequence: bool) -> Result<(), ClientError> {
        self.read_result(msg, expect_sequence).map(|_| ())
    }

    /// Shut the socket down so a blocked reader returns promptly.
    ///
    /// The connection stays registered until the reader notices and drops
    /// it, or until [`close`](Self::close). Safe to call from any thread.
    pub fn abort(&self) {
        if let Some(transport) = self.transport.lock().as_ref() {
            debug!("Aborting connection to {}", transport.peer_addr());
            transport.shutdown();
        }
    }

    /// Close the connection and forget per-connection state.
    pub fn close(&self) {
        if let Some(transport) = self.transport.lock().take() {
            debug!("Closing connection to {}", transport.peer_addr());
            transport.shutdown();
        }
        *self.challenge.lock() = None;
        self.queue.lock().clear();
    }

    fn transport(&self) -> Result<Arc<Transport>, ClientError> {
        self.transport
            .lock()
            .as_ref()
            .cloned()
            .ok_or(ClientError::NotConnected)
    }

    /// Forget `failed` unless a newer connection has already replaced it.
    fn drop_transport(&self, failed: &Arc<Transport>) {
        let mut slot = self.transport.lock();
        if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, failed)) {
            failed.shutdown();
            *slot = None;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl HtspRpc for Session {
    fn request(&self, msg: HtsMsg) -> Result<HtsMsg, ClientError> {
        self.read_result(msg, true)
    }
}

/// SHA-1 over the password bytes followed by the challenge bytes.
pub fn auth_digest(password: &str, challenge: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    hasher.update(challenge);
    hasher.finalize().into()
}

/// Turn a server-side `error` or `noaccess` into a failure.
pub(crate) fn check_reply(reply: &HtsMsg) -> Result<(), ClientError> {
    if let Some(error) = reply.get_str("error") {
        return Err(ClientError::ServerError(error.to_string()));
    }
    if reply.get_s64("noaccess").is_some_and(|v| v != 0) {
        return Err(ClientError::AccessDenied);
    }
    Ok(())
}
