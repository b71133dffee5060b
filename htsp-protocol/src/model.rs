//! Typed views of the metadata the server pushes or returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::genre;
use crate::types::{HtsMsg, HtsValue};

/// Offset applied to server-assigned channel ids when the server reports
/// channel number 0.
pub const UNNUMBERED_CHANNEL_OFFSET: u32 = 1000;

/// DVR error text the backend uses for a recording cancelled by the user.
const DVR_ERROR_ABORTED: &str = "300";

/// A channel as maintained from `channelAdd`/`channelUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: u32,
    pub name: String,
    pub icon: String,
    pub number: u32,
    /// Now-playing EPG event, 0 = none.
    pub event: u32,
    pub is_radio: bool,
    pub conditional_access_id: u32,
    /// Tag ids this channel belongs to, in server order.
    pub tags: Vec<u32>,
}

impl Channel {
    /// A channel known only by id. Old servers never send `channelNumber`,
    /// so the raw id doubles as the display number until told otherwise.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: String::new(),
            icon: String::new(),
            number: id,
            event: 0,
            is_radio: false,
            conditional_access_id: 0,
            tags: Vec::new(),
        }
    }

    /// Overwrite each field present in `msg`, leaving absent ones untouched.
    pub fn apply_update(&mut self, msg: &HtsMsg) {
        if let Some(event) = msg.get_u32("eventId") {
            self.event = event;
        }
        if let Some(name) = msg.get_str("channelName") {
            self.name = name.to_string();
        }
        if let Some(icon) = msg.get_str("channelIcon") {
            self.icon = icon.to_string();
        }
        if let Some(number) = msg.get_u32("channelNumber") {
            self.number = if number == 0 {
                self.id.saturating_add(UNNUMBERED_CHANNEL_OFFSET)
            } else {
                number
            };
        }
        if let Some(tags) = msg.get_u32_list("tags") {
            self.tags = tags;
        }
        if let Some(services) = msg.get_list("services") {
            let services: Vec<&HtsMsg> = services.iter().filter_map(HtsValue::as_map).collect();
            self.is_radio = services
                .iter()
                .any(|s| s.get_str("type") == Some("Radio"));
            if let Some(caid) = services.iter().find_map(|s| s.get_u32("caid")) {
                self.conditional_access_id = caid;
            }
        }
    }
}

/// A channel group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: u32,
    pub name: String,
    pub icon: String,
    /// Member channel ids, in server order.
    pub members: Vec<u32>,
}

impl Tag {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: String::new(),
            icon: String::new(),
            members: Vec::new(),
        }
    }

    pub fn apply_update(&mut self, msg: &HtsMsg) {
        if let Some(icon) = msg.get_str("tagIcon") {
            self.icon = icon.to_string();
        }
        if let Some(name) = msg.get_str("tagName") {
            self.name = name.to_string();
        }
        if let Some(members) = msg.get_u32_list("members") {
            self.members = members;
        }
    }
}

/// An EPG event. Immutable once the server has created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgEvent {
    pub id: u32,
    pub channel_id: Option<u32>,
    /// Unix seconds.
    pub start: i64,
    /// Unix seconds.
    pub stop: i64,
    pub title: String,
    pub description: String,
    /// Following event, 0 = none.
    pub next_event_id: u32,
    /// DVB content descriptor byte.
    pub content_type: Option<u8>,
}

impl EpgEvent {
    /// Parse a `getEvent` reply.
    pub fn from_msg(msg: &HtsMsg) -> Result<Self, ProtocolError> {
        const CONTEXT: &str = "event";
        let id = msg
            .get_u32("eventId")
            .ok_or(ProtocolError::missing("eventId", CONTEXT))?;
        let start = msg
            .get_s64("start")
            .ok_or(ProtocolError::missing("start", CONTEXT))?;
        let stop = msg
            .get_s64("stop")
            .ok_or(ProtocolError::missing("stop", CONTEXT))?;

        let description = join_description(msg.get_str("description"), msg.get_str("ext_text"));

        Ok(Self {
            id,
            channel_id: msg.get_u32("channelId"),
            start,
            stop,
            title: msg.get_str("title").unwrap_or_default().to_string(),
            description,
            next_event_id: msg.get_u32("nextEventId").unwrap_or(0),
            content_type: msg
                .get_s64("contentType")
                .and_then(|v| u8::try_from(v).ok()),
        })
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.start, 0)
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.stop, 0)
    }

    pub fn duration_secs(&self) -> i64 {
        (self.stop - self.start).max(0)
    }

    /// Human-readable genre of the content type, if known.
    pub fn genre(&self) -> Option<&'static str> {
        self.content_type.and_then(genre::genre_name)
    }
}

/// `description` and `ext_text` joined by a newline when both are present.
fn join_description(description: Option<&str>, ext_text: Option<&str>) -> String {
    match (description, ext_text) {
        (Some(d), Some(e)) if !d.is_empty() && !e.is_empty() => format!("{}\n{}", d, e),
        (Some(d), _) if !d.is_empty() => d.to_string(),
        (_, Some(e)) => e.to_string(),
        _ => String::new(),
    }
}

/// Lifecycle state of a DVR entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DvrState {
    Scheduled,
    Recording,
    Completed,
    Aborted,
    Invalid,
}

impl DvrState {
    /// Classify the server's state string. The first keyword contained in
    /// the string wins, checked in the order scheduled, recording,
    /// completed, invalid.
    pub fn from_state_str(state: &str) -> Self {
        const KEYWORDS: [(&str, DvrState); 4] = [
            ("scheduled", DvrState::Scheduled),
            ("recording", DvrState::Recording),
            ("completed", DvrState::Completed),
            ("invalid", DvrState::Invalid),
        ];
        KEYWORDS
            .iter()
            .find(|(keyword, _)| state.contains(keyword))
            .map(|(_, s)| *s)
            .unwrap_or(DvrState::Invalid)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DvrState::Scheduled => "scheduled",
            DvrState::Recording => "recording",
            DvrState::Completed => "completed",
            DvrState::Aborted => "aborted",
            DvrState::Invalid => "invalid",
        }
    }
}

/// A recording or timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvrEntry {
    pub id: u32,
    pub channel_id: u32,
    pub start: i64,
    pub stop: i64,
    pub title: String,
    pub description: String,
    pub state: DvrState,
    pub error: String,
}

impl DvrEntry {
    /// Parse a `dvrEntryAdd`/`dvrEntryUpdate` notification.
    pub fn from_msg(msg: &HtsMsg) -> Result<Self, ProtocolError> {
        const CONTEXT: &str = "dvrEntry";
        let id = msg
            .get_u32("id")
            .ok_or(ProtocolError::missing("id", CONTEXT))?;
        let channel_id = msg
            .get_u32("channel")
            .ok_or(ProtocolError::missing("channel", CONTEXT))?;
        let start = msg
            .get_s64("start")
            .ok_or(ProtocolError::missing("start", CONTEXT))?;
        let stop = msg
            .get_s64("stop")
            .ok_or(ProtocolError::missing("stop", CONTEXT))?;
        let state_str = msg
            .get_str("state")
            .ok_or(ProtocolError::missing("state", CONTEXT))?;

        let mut state = DvrState::from_state_str(state_str);
        let mut error = msg.get_str("error").unwrap_or_default().to_string();
        if error == DVR_ERROR_ABORTED {
            state = DvrState::Aborted;
            error.clear();
        }

        Ok(Self {
            id,
            channel_id,
            start,
            stop,
            title: msg.get_str("title").unwrap_or_default().to_string(),
            description: msg.get_str("description").unwrap_or_default().to_string(),
            state,
            error,
        })
    }
}

/// Reply to `getDiskSpace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpace {
    pub free_bytes: i64,
    pub total_bytes: i64,
}

impl DiskSpace {
    pub fn from_msg(msg: &HtsMsg) -> Result<Self, ProtocolError> {
        Ok(Self {
            free_bytes: msg
                .get_s64("freediskspace")
                .ok_or(ProtocolError::missing("freediskspace", "getDiskSpace"))?,
            total_bytes: msg
                .get_s64("totaldiskspace")
                .ok_or(ProtocolError::missing("totaldiskspace", "getDiskSpace"))?,
        })
    }
}

/// Reply to `getSysTime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysTime {
    /// Unix seconds.
    pub time: i64,
    /// Minutes east of UTC.
    pub gmt_offset: i64,
}

impl SysTime {
    pub fn from_msg(msg: &HtsMsg) -> Result<Self, ProtocolError> {
        Ok(Self {
            time: msg
                .get_s64("time")
                .ok_or(ProtocolError::missing("time", "getSysTime"))?,
            gmt_offset: msg.get_s64("gmtoffset").unwrap_or(0),
        })
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.time, 0)
    }
}

/// Broad media kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
    Subtitle,
    Teletext,
}

/// Codecs the server can announce in `subscriptionStart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    Mpeg2Video,
    H264,
    Hevc,
    Mpeg2Audio,
    Ac3,
    Eac3,
    Aac,
    Vorbis,
    DvbSub,
    TextSub,
    Teletext,
}

impl Codec {
    /// Map the wire `type` string.
    pub fn from_wire(name: &str) -> Option<Self> {
        let codec = match name {
            "MPEG2VIDEO" => Codec::Mpeg2Video,
            "H264" => Codec::H264,
            "HEVC" => Codec::Hevc,
            "MPEG2AUDIO" => Codec::Mpeg2Audio,
            "AC3" => Codec::Ac3,
            "EAC3" => Codec::Eac3,
            "AAC" | "MP4A" => Codec::Aac,
            "VORBIS" => Codec::Vorbis,
            "DVBSUB" => Codec::DvbSub,
            "TEXTSUB" => Codec::TextSub,
            "TELETEXT" => Codec::Teletext,
            _ => return None,
        };
        Some(codec)
    }

    pub fn media_type(self) -> MediaType {
        match self {
            Codec::Mpeg2Video | Codec::H264 | Codec::Hevc => MediaType::Video,
            Codec::Mpeg2Audio | Codec::Ac3 | Codec::Eac3 | Codec::Aac | Codec::Vorbis => {
                MediaType::Audio
            }
            Codec::DvbSub | Codec::TextSub => MediaType::Subtitle,
            Codec::Teletext => MediaType::Teletext,
        }
    }
}

/// Type-specific stream attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamAttributes {
    Video {
        width: u32,
        height: u32,
        aspect_num: u32,
        aspect_den: u32,
    },
    Audio {
        channels: u32,
        sample_rate: u32,
    },
    Subtitle {
        composition_id: u32,
        ancillary_id: u32,
    },
    Teletext,
}

/// One elementary stream of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Server-side stream index; `muxpkt.stream` refers to this.
    pub physical_id: u32,
    pub codec: Codec,
    /// Three-letter language code, if announced.
    pub language: Option<String>,
    pub attributes: StreamAttributes,
}

impl StreamInfo {
    /// Parse one entry of `subscriptionStart.streams`.
    ///
    /// Returns `Ok(None)` for codecs this client does not handle.
    pub fn from_msg(msg: &HtsMsg) -> Result<Option<Self>, ProtocolError> {
        const CONTEXT: &str = "subscriptionStart stream";
        let physical_id = msg
            .get_u32("index")
            .ok_or(ProtocolError::missing("index", CONTEXT))?;
        let type_name = msg
            .get_str("type")
            .ok_or(ProtocolError::missing("type", CONTEXT))?;
        let Some(codec) = Codec::from_wire(type_name) else {
            return Ok(None);
        };

        let attributes = match codec.media_type() {
            MediaType::Video => StreamAttributes::Video {
                width: msg.get_u32("width").unwrap_or(0),
                height: msg.get_u32("height").unwrap_or(0),
                aspect_num: msg.get_u32("aspect_num").unwrap_or(0),
                aspect_den: msg.get_u32("aspect_den").unwrap_or(0),
            },
            MediaType::Audio => StreamAttributes::Audio {
                channels: msg.get_u32("channels").unwrap_or(0),
                sample_rate: msg.get_u32("rate").unwrap_or(0),
            },
            MediaType::Subtitle => StreamAttributes::Subtitle {
                composition_id: msg.get_u32("composition_id").unwrap_or(0),
                ancillary_id: msg.get_u32("ancillary_id").unwrap_or(0),
            },
            MediaType::Teletext => StreamAttributes::Teletext,
        };

        let language = msg
            .get_str("language")
            .filter(|l| !l.is_empty())
            .map(|l| l.chars().take(3).collect());

        Ok(Some(Self {
            physical_id,
            codec,
            language,
            attributes,
        }))
    }

    pub fn media_type(&self) -> MediaType {
        self.codec.media_type()
    }
}

/// Source description carried in `subscriptionStart.sourceinfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub adapter: String,
    pub mux: String,
    pub network: String,
    pub provider: String,
    pub service: String,
}

impl SourceInfo {
    pub fn from_msg(msg: &HtsMsg) -> Self {
        let field = |name: &str| msg.get_str(name).unwrap_or_default().to_string();
        Self {
            adapter: field("adapter"),
            mux: field("mux"),
            network: field("network"),
            provider: field("provider"),
            service: field("service"),
        }
    }
}

/// Server-side queue state from `queueStatus`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub packets: u32,
    pub bytes: u32,
    pub delay: u32,
    pub b_drops: u32,
    pub p_drops: u32,
    pub i_drops: u32,
}

impl QueueStatus {
    pub fn from_msg(msg: &HtsMsg) -> Self {
        let field = |name: &str| msg.get_u32(name).unwrap_or(0);
        Self {
            packets: field("packets"),
            bytes: field("bytes"),
            delay: field("delay"),
            b_drops: field("Bdrops"),
            p_drops: field("Pdrops"),
            i_drops: field("Idrops"),
        }
    }
}

/// Frontend signal state from `signalStatus`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStatus {
    pub status: String,
    pub snr: Option<u32>,
    pub signal: Option<u32>,
    pub ber: Option<u32>,
    pub unc: Option<u32>,
}

impl SignalStatus {
    pub fn from_msg(msg: &HtsMsg) -> Self {
        Self {
            status: msg.get_str("feStatus").unwrap_or_default().to_string(),
            snr: msg.get_u32("feSNR"),
            signal: msg.get_u32("feSignal"),
            ber: msg.get_u32("feBER"),
            unc: msg.get_u32("feUNC"),
        }
    }
}
