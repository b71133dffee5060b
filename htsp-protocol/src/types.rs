//! HTSMSG value model and protocol constants.

use bytes::Bytes;

/// HTSP version proposed by this client in `hello`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default HTSP control port.
pub const DEFAULT_HTSP_PORT: u16 = 9982;

/// Default HTTP port used for recording downloads.
pub const DEFAULT_HTTP_PORT: u16 = 9981;

/// Maximum frame body size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Maximum MAP/LIST nesting accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Size of the frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Size of a field record header: type, name length, data length.
pub const FIELD_HEADER_SIZE: usize = 6;

/// HTSMSG field type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Map = 1,
    S64 = 2,
    Str = 3,
    Bin = 4,
    List = 5,
}

impl TryFrom<u8> for FieldType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(FieldType::Map),
            2 => Ok(FieldType::S64),
            3 => Ok(FieldType::Str),
            4 => Ok(FieldType::Bin),
            5 => Ok(FieldType::List),
            _ => Err(value),
        }
    }
}

impl From<FieldType> for u8 {
    fn from(value: FieldType) -> Self {
        value as u8
    }
}

/// A single HTSMSG value.
#[derive(Debug, Clone, PartialEq)]
pub enum HtsValue {
    Map(HtsMsg),
    S64(i64),
    Str(String),
    Bin(Bytes),
    List(Vec<HtsValue>),
}

impl HtsValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            HtsValue::Map(_) => FieldType::Map,
            HtsValue::S64(_) => FieldType::S64,
            HtsValue::Str(_) => FieldType::Str,
            HtsValue::Bin(_) => FieldType::Bin,
            HtsValue::List(_) => FieldType::List,
        }
    }

    pub fn as_s64(&self) -> Option<i64> {
        match self {
            HtsValue::S64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HtsValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HtsMsg> {
        match self {
            HtsValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// Named field inside a map.
#[derive(Debug, Clone, PartialEq)]
pub struct HtsField {
    pub name: String,
    pub value: HtsValue,
}

/// An ordered HTSMSG map. Every top-level message is one of these.
///
/// Field order is preserved from the wire and on insertion, so encoding a
/// decoded message reproduces the same field sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HtsMsg {
    fields: Vec<HtsField>,
}

impl HtsMsg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request carrying `method`.
    pub fn request(method: Method) -> Self {
        Self::new().with_str("method", method.as_str())
    }

    pub fn fields(&self) -> &[HtsField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First field named `name`.
    pub fn get(&self, name: &str) -> Option<&HtsValue> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get_s64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(HtsValue::as_s64)
    }

    /// S64 field narrowed to `u32`; out-of-range values are treated as absent.
    pub fn get_u32(&self, name: &str) -> Option<u32> {
        self.get_s64(name).and_then(|v| u32::try_from(v).ok())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(HtsValue::as_str)
    }

    pub fn get_bin(&self, name: &str) -> Option<&Bytes> {
        match self.get(name) {
            Some(HtsValue::Bin(b)) => Some(b),
            _ => None,
        }
    }

    pub fn get_map(&self, name: &str) -> Option<&HtsMsg> {
        self.get(name).and_then(HtsValue::as_map)
    }

    pub fn get_list(&self, name: &str) -> Option<&[HtsValue]> {
        match self.get(name) {
            Some(HtsValue::List(items)) => Some(items),
            _ => None,
        }
    }

    /// List of integers narrowed to `u32`, skipping non-integer elements.
    pub fn get_u32_list(&self, name: &str) -> Option<Vec<u32>> {
        self.get_list(name).map(|items| {
            items
                .iter()
                .filter_map(HtsValue::as_s64)
                .filter_map(|v| u32::try_from(v).ok())
                .collect()
        })
    }

    /// The `method` string, if any.
    pub fn method(&self) -> Option<&str> {
        self.get_str("method")
    }

    /// The `seq` correlation number, if any.
    pub fn seq(&self) -> Option<u32> {
        self.get_u32("seq")
    }

    pub fn add(&mut self, name: impl Into<String>, value: HtsValue) {
        self.fields.push(HtsField {
            name: name.into(),
            value,
        });
    }

    /// Replace the first field named `name`, or append it.
    pub fn set(&mut self, name: &str, value: HtsValue) {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.value = value,
            None => self.add(name, value),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<HtsValue> {
        let pos = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(pos).value)
    }

    pub fn with_s64(mut self, name: &str, value: i64) -> Self {
        self.add(name, HtsValue::S64(value));
        self
    }

    pub fn with_str(mut self, name: &str, value: impl Into<String>) -> Self {
        self.add(name, HtsValue::Str(value.into()));
        self
    }

    pub fn with_bin(mut self, name: &str, value: impl Into<Bytes>) -> Self {
        self.add(name, HtsValue::Bin(value.into()));
        self
    }

    pub fn with_map(mut self, name: &str, value: HtsMsg) -> Self {
        self.add(name, HtsValue::Map(value));
        self
    }

    pub fn with_list(mut self, name: &str, value: Vec<HtsValue>) -> Self {
        self.add(name, HtsValue::List(value));
        self
    }
}

impl From<Vec<HtsField>> for HtsMsg {
    fn from(fields: Vec<HtsField>) -> Self {
        Self { fields }
    }
}

/// Method names understood by this client.
///
/// Dispatch matches names exactly; anything else is [`None`] from
/// [`Method::from_name`] and gets ignored by the receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    // Requests
    Hello,
    Authenticate,
    EnableAsyncMetadata,
    Subscribe,
    Unsubscribe,
    GetEvent,
    GetDiskSpace,
    GetSysTime,
    AddDvrEntry,
    UpdateDvrEntry,
    DeleteDvrEntry,
    CancelDvrEntry,

    // Metadata notifications
    ChannelAdd,
    ChannelUpdate,
    ChannelRemove,
    TagAdd,
    TagUpdate,
    TagRemove,
    DvrEntryAdd,
    DvrEntryUpdate,
    DvrEntryDelete,
    InitialSyncCompleted,

    // Subscription notifications
    SubscriptionStart,
    SubscriptionStop,
    SubscriptionStatus,
    MuxPkt,
    QueueStatus,
    SignalStatus,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Hello => "hello",
            Method::Authenticate => "authenticate",
            Method::EnableAsyncMetadata => "enableAsyncMetadata",
            Method::Subscribe => "subscribe",
            Method::Unsubscribe => "unsubscribe",
            Method::GetEvent => "getEvent",
            Method::GetDiskSpace => "getDiskSpace",
            Method::GetSysTime => "getSysTime",
            Method::AddDvrEntry => "addDvrEntry",
            Method::UpdateDvrEntry => "updateDvrEntry",
            Method::DeleteDvrEntry => "deleteDvrEntry",
            Method::CancelDvrEntry => "cancelDvrEntry",
            Method::ChannelAdd => "channelAdd",
            Method::ChannelUpdate => "channelUpdate",
            Method::ChannelRemove => "channelRemove",
            Method::TagAdd => "tagAdd",
            Method::TagUpdate => "tagUpdate",
            Method::TagRemove => "tagRemove",
            Method::DvrEntryAdd => "dvrEntryAdd",
            Method::DvrEntryUpdate => "dvrEntryUpdate",
            Method::DvrEntryDelete => "dvrEntryDelete",
            Method::InitialSyncCompleted => "initialSyncCompleted",
            Method::SubscriptionStart => "subscriptionStart",
            Method::SubscriptionStop => "subscriptionStop",
            Method::SubscriptionStatus => "subscriptionStatus",
            Method::MuxPkt => "muxpkt",
            Method::QueueStatus => "queueStatus",
            Method::SignalStatus => "signalStatus",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::try_from(name).ok()
    }

    /// Method of a message, if it names a known one.
    pub fn of(msg: &HtsMsg) -> Option<Self> {
        msg.method().and_then(Self::from_name)
    }
}

impl TryFrom<&str> for Method {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, ()> {
        let method = match value {
            "hello" => Method::Hello,
            "authenticate" => Method::Authenticate,
            "enableAsyncMetadata" => Method::EnableAsyncMetadata,
            "subscribe" => Method::Subscribe,
            "unsubscribe" => Method::Unsubscribe,
            "getEvent" => Method::GetEvent,
            "getDiskSpace" => Method::GetDiskSpace,
            "getSysTime" => Method::GetSysTime,
            "addDvrEntry" => Method::AddDvrEntry,
            "updateDvrEntry" => Method::UpdateDvrEntry,
            "deleteDvrEntry" => Method::DeleteDvrEntry,
            "cancelDvrEntry" => Method::CancelDvrEntry,
            "channelAdd" => Method::ChannelAdd,
            "channelUpdate" => Method::ChannelUpdate,
            "channelRemove" => Method::ChannelRemove,
            "tagAdd" => Method::TagAdd,
            "tagUpdate" => Method::TagUpdate,
            "tagRemove" => Method::TagRemove,
            "dvrEntryAdd" => Method::DvrEntryAdd,
            "dvrEntryUpdate" => Method::DvrEntryUpdate,
            "dvrEntryDelete" => Method::DvrEntryDelete,
            "initialSyncCompleted" => Method::InitialSyncCompleted,
            "subscriptionStart" => Method::SubscriptionStart,
            "subscriptionStop" => Method::SubscriptionStop,
            "subscriptionStatus" => Method::SubscriptionStatus,
            "muxpkt" => Method::MuxPkt,
            "queueStatus" => Method::QueueStatus,
            "signalStatus" => Method::SignalStatus,
            _ => return Err(()),
        };
        Ok(method)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
