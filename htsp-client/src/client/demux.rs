//! Live subscription turning `muxpkt` messages into timestamped packets.

use std::time::Instant;

use bytes::Bytes;
use log::{debug, info, trace, warn};

use htsp_protocol::requests;
use htsp_protocol::{
    ClientError, HtsMsg, Method, QueueStatus, SignalStatus, SourceInfo, StreamInfo,
};

use crate::client::session::Session;
use crate::config::ConnectionConfig;

/// Wire timestamps are microseconds.
const WIRE_TIME_BASE: i64 = 1_000_000;

/// One elementary-stream packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Position in [`Demuxer::streams`], `None` if the server's stream id
    /// is not in the table.
    pub stream_index: Option<usize>,
    /// Server-side stream id as sent in `muxpkt.stream`.
    pub stream_id: u32,
    pub payload: Bytes,
    /// Timestamps in the demuxer's time base.
    pub dts: Option<i64>,
    pub pts: Option<i64>,
    pub duration: Option<i64>,
    /// Picture type byte (`I`, `P`, `B`), if sent.
    pub frame_type: Option<u8>,
}

/// Output of one [`Demuxer::read`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxPacket {
    Data(Packet),
    /// The stream table was replaced; re-read [`Demuxer::streams`].
    StreamChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    Idle,
    Streaming,
}

/// A channel subscription on a dedicated session.
pub struct Demuxer {
    session: Session,
    time_base: i64,
    state: DemuxState,
    channel_id: u32,
    subscription_id: u32,
    next_subscription_id: u32,
    streams: Vec<StreamInfo>,
    status: Option<String>,
    source: SourceInfo,
    queue_status: QueueStatus,
    signal: SignalStatus,
}

impl Demuxer {
    /// Connect, log in and subscribe to `channel_id`, returning once the
    /// stream table is known.
    pub fn open(config: ConnectionConfig, channel_id: u32) -> Result<Self, ClientError> {
        let time_base = config.time_base;
        let session = Session::new(config);
        session.connect()?;
        {
            let config = session.config();
            session.authenticate(&config.username, &config.password)?;
        }

        let mut demuxer = Self {
            session,
            time_base,
            state: DemuxState::Idle,
            channel_id,
            subscription_id: 0,
            next_subscription_id: 1,
            streams: Vec::new(),
            status: None,
            source: SourceInfo::default(),
            queue_status: QueueStatus::default(),
            signal: SignalStatus::default(),
        };
        demuxer.subscribe(channel_id)?;
        Ok(demuxer)
    }

    /// Read one message and turn it into at most one packet.
    ///
    /// `Ok(None)` covers timeouts, control messages and skipped packets;
    /// the caller simply calls again.
    pub fn read(&mut self) -> Result<Option<DemuxPacket>, ClientError> {
        let poll_interval = self.session.config().poll_interval;
        match self.session.read_message(Some(poll_interval)) {
            Ok(Some(msg)) => Ok(self.handle(&msg)),
            Ok(None) => Ok(None),
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// Move the subscription to another channel. Never reuses a
    /// subscription id.
    pub fn switch_channel(&mut self, channel_id: u32) -> Result<(), ClientError> {
        info!("Switching from channel {} to {}", self.channel_id, channel_id);
        self.unsubscribe()?;
        self.subscribe(channel_id)
    }

    /// Unsubscribe and close the session.
    pub fn close(&mut self) {
        if self.session.is_connected() {
            if let Err(e) = self.unsubscribe() {
                debug!("Unsubscribe on close failed: {}", e);
            }
        }
        self.session.close();
        self.state = DemuxState::Idle;
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    /// Current stream table, in the order the server announced it.
    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    /// Last `subscriptionStatus` text; `None` when the server reports no
    /// problem.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn source_info(&self) -> &SourceInfo {
        &self.source
    }

    pub fn queue_status(&self) -> &QueueStatus {
        &self.queue_status
    }

    pub fn signal_status(&self) -> &SignalStatus {
        &self.signal
    }

    fn subscribe(&mut self, channel_id: u32) -> Result<(), ClientError> {
        let subscription_id = self.next_subscription_id;
        self.next_subscription_id = self.next_subscription_id.wrapping_add(1).max(1);

        self.reset();
        self.channel_id = channel_id;
        self.subscription_id = subscription_id;
        self.session
            .read_success(requests::subscribe(channel_id, subscription_id), true)?;
        debug!(
            "Subscribed to channel {} (subscription {})",
            channel_id, subscription_id
        );
        self.wait_for_start()
    }

    fn unsubscribe(&mut self) -> Result<(), ClientError> {
        let subscription_id = self.subscription_id;
        self.reset();
        self.session
            .read_success(requests::unsubscribe(subscription_id), true)
    }

    /// Keep reading until `subscriptionStart` populates the stream table.
    fn wait_for_start(&mut self) -> Result<(), ClientError> {
        let timeout = self.session.config().sync_timeout;
        let poll_interval = self.session.config().poll_interval;
        let deadline = Instant::now() + timeout;

        while self.state != DemuxState::Streaming {
            if Instant::now() >= deadline {
                warn!(
                    "No subscriptionStart for channel {} within {:?}",
                    self.channel_id, timeout
                );
                return Err(ClientError::Timeout);
            }
            match self.session.read_message(Some(poll_interval)) {
                Ok(Some(msg)) => {
                    self.handle(&msg);
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {}
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = DemuxState::Idle;
        self.streams.clear();
        self.status = None;
        self.source = SourceInfo::default();
        self.queue_status = QueueStatus::default();
        self.signal = SignalStatus::default();
    }

    fn handle(&mut self, msg: &HtsMsg) -> Option<DemuxPacket> {
        let method = Method::of(msg)?;
        if let Some(id) = msg.get_u32("subscriptionId") {
            if id != self.subscription_id {
                trace!("Ignoring {} for stale subscription {}", method, id);
                return None;
            }
        }

        match method {
            Method::MuxPkt => self.handle_packet(msg).map(DemuxPacket::Data),
            Method::SubscriptionStart => {
                self.handle_start(msg);
                Some(DemuxPacket::StreamChange)
            }
            Method::SubscriptionStop => {
                info!(
                    "Subscription {} stopped: {}",
                    self.subscription_id,
                    msg.get_str("status").unwrap_or("no reason given")
                );
                self.reset();
                None
            }
            Method::SubscriptionStatus => {
                self.status = msg.get_str("status").map(str::to_string);
                match &self.status {
                    Some(status) => warn!("Subscription status: {}", status),
                    None => debug!("Subscription status cleared"),
                }
                None
            }
            Method::QueueStatus => {
                self.queue_status = QueueStatus::from_msg(msg);
                None
            }
            Method::SignalStatus => {
                self.signal = SignalStatus::from_msg(msg);
                None
            }
            _ => None,
        }
    }

    fn handle_start(&mut self, msg: &HtsMsg) {
        let mut streams = Vec::new();
        for entry in msg.get_list("streams").unwrap_or_default() {
            let Some(entry) = entry.as_map() else {
                continue;
            };
            match StreamInfo::from_msg(entry) {
                Ok(Some(stream)) => streams.push(stream),
                Ok(None) => debug!(
                    "Skipping unsupported stream type {:?}",
                    entry.get_str("type")
                ),
                Err(e) => warn!("Skipping malformed stream: {}", e),
            }
        }

        if let Some(source) = msg.get_map("sourceinfo") {
            self.source = SourceInfo::from_msg(source);
        }

        info!(
            "Subscription {} started with {} streams",
            self.subscription_id,
            streams.len()
        );
        self.streams = streams;
        self.state = DemuxState::Streaming;
    }

    fn handle_packet(&self, msg: &HtsMsg) -> Option<Packet> {
        if self.state != DemuxState::Streaming {
            return None;
        }
        let (Some(stream_id), Some(payload)) = (msg.get_u32("stream"), msg.get_bin("payload"))
        else {
            debug!("Skipping muxpkt without stream or payload");
            return None;
        };

        Some(Packet {
            stream_index: self.streams.iter().position(|s| s.physical_id == stream_id),
            stream_id,
            payload: payload.clone(),
            dts: msg.get_s64("dts").map(|t| self.rescale(t)),
            pts: msg.get_s64("pts").map(|t| self.rescale(t)),
            duration: msg.get_s64("duration").map(|t| self.rescale(t)),
            frame_type: msg
                .get_s64("frametype")
                .and_then(|t| u8::try_from(t).ok()),
        })
    }

    fn rescale(&self, wire: i64) -> i64 {
        if self.time_base == WIRE_TIME_BASE {
            return wire;
        }
        let scaled = i128::from(wire) * i128::from(self.time_base) / i128::from(WIRE_TIME_BASE);
        i64::try_from(scaled).unwrap_or(if scaled < 0 { i64::MIN } else { i64::MAX })
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.close();
    }
}
