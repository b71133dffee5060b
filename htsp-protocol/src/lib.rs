//! HTSP protocol definitions.
//!
//! This crate holds the HTSMSG wire codec and the message shapes used
//! between an HTSP client and a TV-streaming backend. It performs no I/O.
//!
//! # Frame Format
//!
//! ```text
//! +-----------------+------------------------------+
//! | Length (u32 BE) |  Field records (top-level map) |
//! +-----------------+------------------------------+
//! |     4 bytes     |         Length bytes          |
//! ```
//!
//! # Example
//!
//! ```rust
//! use htsp_protocol::{decode_frame_len, decode_message, encode_frame, HtsMsg, Method};
//!
//! let msg = HtsMsg::request(Method::GetEvent).with_s64("eventId", 42);
//! let frame = encode_frame(&msg).unwrap();
//!
//! let len = decode_frame_len(&frame).unwrap().unwrap() as usize;
//! let decoded = decode_message(frame.slice(4..4 + len)).unwrap();
//! assert_eq!(decoded.get_u32("eventId"), Some(42));
//! ```

pub mod codec;
pub mod error;
pub mod genre;
pub mod model;
pub mod requests;
pub mod types;

pub use codec::{decode_frame_len, decode_message, encode_frame, encode_message};
pub use error::{ClientError, ProtocolError};
pub use model::{
    Channel, Codec, DiskSpace, DvrEntry, DvrState, EpgEvent, MediaType, QueueStatus,
    SignalStatus, SourceInfo, StreamAttributes, StreamInfo, SysTime, Tag,
};
pub use requests::{DvrEntryChanges, NewDvrEntry};
pub use types::{
    FieldType, HtsField, HtsMsg, HtsValue, Method, DEFAULT_HTSP_PORT, DEFAULT_HTTP_PORT,
    FRAME_HEADER_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
