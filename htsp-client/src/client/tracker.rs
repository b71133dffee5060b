//! Background reader keeping server metadata in sync.
//!
//! After the greeting and login, one dedicated thread owns every read from
//! the session. It routes `seq`-tagged replies to the request that is
//! waiting for them and applies push notifications to the shared
//! [`ServerState`]. Requests from other threads register a waiter keyed by
//! `seq` and block on it with a timeout.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use htsp_protocol::requests;
use htsp_protocol::{Channel, ClientError, DvrEntry, EpgEvent, HtsMsg, HtsValue, Method, Tag};

use crate::client::rpc::HtspRpc;
use crate::client::session::{check_reply, ServerInfo, Session};
use crate::client::state::{Applied, ServerState};
use crate::config::ConnectionConfig;

/// Connection lifecycle as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    /// Connected; the initial metadata dump is still arriving.
    Syncing,
    /// `initialSyncCompleted` has been received.
    Ready,
}

/// State shared between the client handle and its reader thread.
struct Shared {
    session: Session,
    state: Mutex<ServerState>,
    /// Events fetched with `getEvent`. Events never change once created.
    events: Mutex<HashMap<u32, EpgEvent>>,
    /// Requests waiting for the reply with a given `seq`.
    pending: Mutex<HashMap<u32, SyncSender<HtsMsg>>>,
    sync: Mutex<SyncState>,
    sync_changed: Condvar,
}

impl Shared {
    fn set_sync(&self, state: SyncState) {
        *self.sync.lock() = state;
        self.sync_changed.notify_all();
    }

    fn dispatch(&self, msg: HtsMsg) {
        if let Some(seq) = msg.seq() {
            let waiter = self.pending.lock().remove(&seq);
            if let Some(waiter) = waiter {
                // The waiter may have timed out just now.
                let _ = waiter.send(msg);
                return;
            }
        }

        let Some(method) = Method::of(&msg) else {
            trace!("Discarding message without known method (seq {:?})", msg.seq());
            return;
        };

        let applied = self.state.lock().apply(method, &msg);
        match applied {
            Ok(Applied::SyncCompleted) => {
                {
                    let state = self.state.lock();
                    info!(
                        "Initial sync completed: {} channels, {} tags, {} recordings",
                        state.channels.len(),
                        state.tags.len(),
                        state.recordings.len()
                    );
                }
                self.set_sync(SyncState::Ready);
            }
            Ok(Applied::Updated) => {}
            Ok(Applied::Ignored) => trace!("Ignoring {}", method),
            Err(e) => error!("Dropping malformed {}: {}", method, e),
        }
    }

    fn reader_loop(&self) {
        let poll_interval = self.session.config().poll_interval;
        debug!("Reader thread started");

        loop {
            match self.session.read_message(Some(poll_interval)) {
                Ok(Some(msg)) => self.dispatch(msg),
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    info!("Connection lost: {}", e);
                    break;
                }
                Err(e) => warn!("Skipping undecodable message: {}", e),
            }
        }

        self.set_sync(SyncState::Disconnected);
        // Dropping the senders fails every outstanding request.
        let abandoned = std::mem::take(&mut *self.pending.lock());
        if !abandoned.is_empty() {
            debug!("Releasing {} pending requests", abandoned.len());
        }
        debug!("Reader thread stopped");
    }
}

/// An HTSP client with a live mirror of the server's metadata.
pub struct HtspClient {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl HtspClient {
    /// Connect, log in and wait for the initial metadata sync.
    pub fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let client = Self {
            shared: Arc::new(Shared {
                session: Session::new(config),
                state: Mutex::new(ServerState::new()),
                events: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                sync: Mutex::new(SyncState::Disconnected),
                sync_changed: Condvar::new(),
            }),
            reader: Mutex::new(None),
        };
        client.start()?;
        Ok(client)
    }

    fn start(&self) -> Result<(), ClientError> {
        self.stop_reader();

        let shared = &self.shared;
        let session = &shared.session;
        let config = session.config();

        session.connect()?;
        if let Err(e) = session.authenticate(&config.username, &config.password) {
            session.close();
            return Err(e);
        }

        shared.state.lock().clear();
        shared.events.lock().clear();
        shared.set_sync(SyncState::Syncing);

        if let Err(e) = session.read_success(requests::enable_async_metadata(), true) {
            error!("enableAsyncMetadata failed: {}", e);
            session.close();
            shared.set_sync(SyncState::Disconnected);
            return Err(e);
        }

        let reader_shared = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("htsp-reader".to_string())
            .spawn(move || reader_shared.reader_loop())
            .inspect_err(|_| {
                session.close();
                shared.set_sync(SyncState::Disconnected);
            })?;
        *self.reader.lock() = Some(handle);

        match self.wait_for_sync(config.sync_timeout) {
            SyncState::Ready => Ok(()),
            SyncState::Disconnected => {
                self.stop_reader();
                Err(ClientError::ConnectionClosed)
            }
            SyncState::Syncing => {
                warn!(
                    "Initial sync did not complete within {:?}",
                    config.sync_timeout
                );
                self.disconnect();
                Err(ClientError::Timeout)
            }
        }
    }

    /// Block until the sync state leaves `Syncing` or `timeout` elapses.
    pub fn wait_for_sync(&self, timeout: Duration) -> SyncState {
        let deadline = Instant::now() + timeout;
        let mut sync = self.shared.sync.lock();
        while *sync == SyncState::Syncing {
            if self
                .shared
                .sync_changed
                .wait_until(&mut sync, deadline)
                .timed_out()
            {
                break;
            }
        }
        *sync
    }

    /// Reconnect if the connection was lost.
    ///
    /// Sequence numbers keep counting across reconnects.
    pub fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.is_connected() && self.sync_state() != SyncState::Disconnected {
            return Ok(());
        }
        info!("Reconnecting to {}", self.shared.session.config().address());
        self.start()
    }

    /// Close the connection and stop the reader thread.
    pub fn disconnect(&self) {
        self.shared.session.abort();
        self.stop_reader();
        self.shared.session.close();
        self.shared.set_sync(SyncState::Disconnected);
    }

    fn stop_reader(&self) {
        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            self.shared.session.abort();
            if handle.join().is_err() {
                error!("Reader thread panicked");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session.is_connected()
    }

    pub fn sync_state(&self) -> SyncState {
        *self.shared.sync.lock()
    }

    pub fn server_info(&self) -> ServerInfo {
        self.shared.session.server_info()
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.shared.session.config()
    }

    /// All channels, ordered by channel number.
    pub fn channels(&self) -> Vec<Channel> {
        self.shared.state.lock().sorted_channels()
    }

    pub fn channel(&self, id: u32) -> Option<Channel> {
        self.shared.state.lock().channels.get(&id).cloned()
    }

    /// All tags, ordered by id.
    pub fn tags(&self) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self.shared.state.lock().tags.values().cloned().collect();
        tags.sort_by_key(|t| t.id);
        tags
    }

    pub fn tag(&self, id: u32) -> Option<Tag> {
        self.shared.state.lock().tags.get(&id).cloned()
    }

    /// Channels of one tag, in the tag's member order.
    pub fn channels_in_tag(&self, tag_id: u32) -> Vec<Channel> {
        self.shared.state.lock().channels_in_tag(tag_id)
    }

    /// All recordings and timers, ordered by start time.
    pub fn recordings(&self) -> Vec<DvrEntry> {
        let mut entries: Vec<DvrEntry> = self
            .shared
            .state
            .lock()
            .recordings
            .values()
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.start, e.id));
        entries
    }

    pub fn recording(&self, id: u32) -> Option<DvrEntry> {
        self.shared.state.lock().recordings.get(&id).cloned()
    }

    /// An EPG event, fetched once and then served from the cache.
    pub fn event(&self, id: u32) -> Result<EpgEvent, ClientError> {
        if let Some(event) = self.shared.events.lock().get(&id) {
            return Ok(event.clone());
        }
        let event = self.get_event(id)?;
        self.shared.events.lock().insert(id, event.clone());
        Ok(event)
    }

    /// Number of cached EPG events.
    pub fn cached_events(&self) -> usize {
        self.shared.events.lock().len()
    }
}

impl HtspRpc for HtspClient {
    /// Send `msg` and wait for the reader thread to hand over its reply.
    fn request(&self, msg: HtsMsg) -> Result<HtsMsg, ClientError> {
        let shared = &self.shared;
        if self.sync_state() == SyncState::Disconnected {
            return Err(ClientError::NotConnected);
        }

        let mut msg = msg;
        let seq = shared.session.add_sequence();
        msg.set("seq", HtsValue::S64(i64::from(seq)));

        let (tx, rx) = mpsc::sync_channel(1);
        shared.pending.lock().insert(seq, tx);

        if let Err(e) = shared.session.send_message(&msg) {
            shared.pending.lock().remove(&seq);
            return Err(e);
        }

        let timeout = shared.session.config().response_timeout;
        let result = match rx.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "No reply to {} (seq {}) within {:?}",
                    msg.method().unwrap_or_default(),
                    seq,
                    timeout
                );
                Err(ClientError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(ClientError::ConnectionClosed),
        };
        shared.pending.lock().remove(&seq);

        let reply = result?;
        check_reply(&reply)?;
        Ok(reply)
    }
}

impl Drop for HtspClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{hello_reply, FakeConn, FakeServer};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Greeting plus `enableAsyncMetadata`, then `pushes` and sync completion.
    fn serve_sync(conn: &mut FakeConn, pushes: &[HtsMsg]) -> u32 {
        conn.recv();
        conn.send(&hello_reply(None));

        let enable = conn.recv();
        assert_eq!(Method::of(&enable), Some(Method::EnableAsyncMetadata));
        conn.reply(&enable, HtsMsg::new());

        for push in pushes {
            conn.send(push);
        }
        conn.send(&HtsMsg::request(Method::InitialSyncCompleted));
        enable.seq().unwrap()
    }

    fn channel_add(id: i64, name: &str, number: i64) -> HtsMsg {
        HtsMsg::request(Method::ChannelAdd)
            .with_s64("channelId", id)
            .with_str("channelName", name)
            .with_s64("channelNumber", number)
    }

    #[test]
    fn test_initial_sync_and_queries() {
        let server = FakeServer::start(|conn| {
            serve_sync(
                conn,
                &[
                    channel_add(10, "Ten", 2),
                    channel_add(11, "Eleven", 1),
                    HtsMsg::request(Method::TagAdd)
                        .with_s64("tagId", 1)
                        .with_str("tagName", "HD")
                        .with_list("members", vec![HtsValue::S64(10)]),
                    HtsMsg::request(Method::DvrEntryAdd)
                        .with_s64("id", 4)
                        .with_s64("channel", 10)
                        .with_s64("start", 1000)
                        .with_s64("stop", 2000)
                        .with_str("state", "scheduled"),
                ],
            );
            conn.expect_closed();
        });

        let client = HtspClient::connect(server.config()).unwrap();
        assert_eq!(client.sync_state(), SyncState::Ready);
        assert_eq!(client.server_info().name, "fake");

        let names: Vec<String> = client.channels().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Eleven", "Ten"]);
        assert_eq!(client.tag(1).unwrap().name, "HD");
        assert_eq!(client.channels_in_tag(1)[0].id, 10);
        assert_eq!(client.recordings().len(), 1);
        assert!(client.recording(4).is_some());

        client.disconnect();
        assert_eq!(client.sync_state(), SyncState::Disconnected);
        server.join();
    }

    #[test]
    fn test_request_reply_interleaved_with_pushes() {
        let server = FakeServer::start(|conn| {
            serve_sync(conn, &[channel_add(1, "One", 1)]);

            let req = conn.recv();
            assert_eq!(Method::of(&req), Some(Method::GetSysTime));
            conn.send(
                &HtsMsg::request(Method::ChannelUpdate)
                    .with_s64("channelId", 1)
                    .with_str("channelName", "One+1"),
            );
            conn.send(&HtsMsg::new().with_s64("seq", 999_999));
            conn.reply(&req, HtsMsg::new().with_s64("time", 1_700_000_000).with_s64("gmtoffset", 60));
            conn.expect_closed();
        });

        let client = HtspClient::connect(server.config()).unwrap();
        let time = client.get_sys_time().unwrap();
        assert_eq!(time.time, 1_700_000_000);
        assert_eq!(time.gmt_offset, 60);
        // Pushes before the reply are applied before the reply is handed over.
        assert_eq!(client.channel(1).unwrap().name, "One+1");
        assert_eq!(client.channel(1).unwrap().number, 1);

        drop(client);
        server.join();
    }

    #[test]
    fn test_sync_timeout_fails_connect() {
        let server = FakeServer::start(|conn| {
            conn.recv();
            conn.send(&hello_reply(None));
            let enable = conn.recv();
            conn.reply(&enable, HtsMsg::new());
            conn.expect_closed();
        });

        let config = ConnectionConfig {
            sync_timeout: Duration::from_millis(200),
            ..server.config()
        };
        assert!(matches!(
            HtspClient::connect(config),
            Err(ClientError::Timeout)
        ));
        server.join();
    }

    #[test]
    fn test_connection_loss_releases_waiters() {
        let server = FakeServer::start(|conn| {
            serve_sync(conn, &[]);
            // Take the request and hang up without replying.
            let req = conn.recv();
            assert_eq!(Method::of(&req), Some(Method::GetDiskSpace));
        });

        let config = ConnectionConfig {
            response_timeout: Duration::from_secs(30),
            ..server.config()
        };
        let client = HtspClient::connect(config).unwrap();

        let started = Instant::now();
        assert_eq!(client.get_disk_space(), Err(ClientError::ConnectionClosed));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(
            client.wait_for_sync(Duration::from_secs(2)),
            SyncState::Disconnected
        );
        assert!(client.shared.pending.lock().is_empty());
        assert_eq!(client.get_disk_space(), Err(ClientError::NotConnected));
        server.join();
    }

    #[test]
    fn test_reconnect_keeps_sequence_increasing() {
        let last_seq = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&last_seq);
        let server = FakeServer::start_many(2, move |n, conn| {
            let seq = serve_sync(conn, &[channel_add(1, &format!("gen{}", n), 1)]);
            assert!(seq > seen.swap(seq, Ordering::SeqCst));
            if n == 0 {
                // Hang up on the first request.
                conn.recv();
            } else {
                conn.expect_closed();
            }
        });

        let client = HtspClient::connect(server.config()).unwrap();
        assert_eq!(client.sync_state(), SyncState::Ready);
        assert_eq!(client.get_sys_time(), Err(ClientError::ConnectionClosed));
        assert_eq!(client.sync_state(), SyncState::Disconnected);
        assert!(!client.is_connected());

        client.ensure_connected().unwrap();
        assert_eq!(client.sync_state(), SyncState::Ready);
        assert_eq!(client.channel(1).unwrap().name, "gen1");
        assert!(last_seq.load(Ordering::SeqCst) > 0);

        client.disconnect();
        server.join();
    }

    #[test]
    fn test_event_cache_fetches_once() {
        let server = FakeServer::start(|conn| {
            serve_sync(conn, &[]);

            let req = conn.recv();
            assert_eq!(req.get_u32("eventId"), Some(8));
            conn.reply(
                &req,
                HtsMsg::new()
                    .with_s64("eventId", 8)
                    .with_s64("start", 10)
                    .with_s64("stop", 20)
                    .with_str("title", "Film")
                    .with_s64("contentType", 0x10),
            );

            while let Some(msg) = conn.try_recv() {
                panic!("unexpected {:?} after cached event", msg.method());
            }
        });

        let client = HtspClient::connect(server.config()).unwrap();
        let first = client.event(8).unwrap();
        let second = client.event(8).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.genre(), Some("Movie/Drama"));
        assert_eq!(client.cached_events(), 1);

        client.disconnect();
        server.join();
    }

    #[test]
    fn test_server_error_keeps_connection() {
        let server = FakeServer::start(|conn| {
            serve_sync(conn, &[]);
            let req = conn.recv();
            conn.reply(&req, HtsMsg::new().with_str("error", "Event does not exist"));
            conn.expect_closed();
        });

        let client = HtspClient::connect(server.config()).unwrap();
        assert_eq!(
            client.get_event(1),
            Err(ClientError::ServerError("Event does not exist".into()))
        );
        assert_eq!(client.sync_state(), SyncState::Ready);
        assert!(client.is_connected());

        client.disconnect();
        server.join();
    }
}
