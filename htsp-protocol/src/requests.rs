//! Builders for the request messages this client sends.

use serde::{Deserialize, Serialize};

use crate::types::{HtsMsg, Method};

pub fn hello(client_name: &str, version: u32) -> HtsMsg {
    HtsMsg::request(Method::Hello)
        .with_str("clientname", client_name)
        .with_s64("htspversion", i64::from(version))
}

/// `authenticate`, optionally carrying the 20-byte password digest.
pub fn authenticate(username: &str, digest: Option<&[u8]>) -> HtsMsg {
    let msg = HtsMsg::request(Method::Authenticate).with_str("username", username);
    match digest {
        Some(d) => msg.with_bin("digest", d.to_vec()),
        None => msg,
    }
}

pub fn enable_async_metadata() -> HtsMsg {
    HtsMsg::request(Method::EnableAsyncMetadata)
}

pub fn subscribe(channel_id: u32, subscription_id: u32) -> HtsMsg {
    HtsMsg::request(Method::Subscribe)
        .with_s64("channelId", i64::from(channel_id))
        .with_s64("subscriptionId", i64::from(subscription_id))
}

pub fn unsubscribe(subscription_id: u32) -> HtsMsg {
    HtsMsg::request(Method::Unsubscribe).with_s64("subscriptionId", i64::from(subscription_id))
}

pub fn get_event(event_id: u32) -> HtsMsg {
    HtsMsg::request(Method::GetEvent).with_s64("eventId", i64::from(event_id))
}

pub fn get_disk_space() -> HtsMsg {
    HtsMsg::request(Method::GetDiskSpace)
}

pub fn get_sys_time() -> HtsMsg {
    HtsMsg::request(Method::GetSysTime)
}

/// Parameters for scheduling a new recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDvrEntry {
    pub channel_id: u32,
    /// Unix seconds.
    pub start: i64,
    /// Unix seconds.
    pub stop: i64,
    pub title: String,
    pub description: String,
    /// Schedule from an EPG event instead of a manual time range.
    pub event_id: Option<u32>,
    pub priority: Option<u32>,
    /// Padding before start, minutes.
    pub start_extra: Option<i64>,
    /// Padding after stop, minutes.
    pub stop_extra: Option<i64>,
}

pub fn add_dvr_entry(entry: &NewDvrEntry) -> HtsMsg {
    let mut msg = HtsMsg::request(Method::AddDvrEntry)
        .with_s64("channelId", i64::from(entry.channel_id))
        .with_s64("start", entry.start)
        .with_s64("stop", entry.stop)
        .with_str("title", entry.title.as_str())
        .with_str("description", entry.description.as_str());
    if let Some(event_id) = entry.event_id {
        msg = msg.with_s64("eventId", i64::from(event_id));
    }
    if let Some(priority) = entry.priority {
        msg = msg.with_s64("priority", i64::from(priority));
    }
    if let Some(extra) = entry.start_extra {
        msg = msg.with_s64("startExtra", extra);
    }
    if let Some(extra) = entry.stop_extra {
        msg = msg.with_s64("stopExtra", extra);
    }
    msg
}

/// Changes to an existing recording; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvrEntryChanges {
    pub id: u32,
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
}

pub fn update_dvr_entry(changes: &DvrEntryChanges) -> HtsMsg {
    let mut msg = HtsMsg::request(Method::UpdateDvrEntry).with_s64("id", i64::from(changes.id));
    if let Some(start) = changes.start {
        msg = msg.with_s64("start", start);
    }
    if let Some(stop) = changes.stop {
        msg = msg.with_s64("stop", stop);
    }
    if let Some(title) = &changes.title {
        msg = msg.with_str("title", title.as_str());
    }
    if let Some(description) = &changes.description {
        msg = msg.with_str("description", description.as_str());
    }
    msg
}

pub fn delete_dvr_entry(id: u32) -> HtsMsg {
    HtsMsg::request(Method::DeleteDvrEntry).with_s64("id", i64::from(id))
}

pub fn cancel_dvr_entry(id: u32) -> HtsMsg {
    HtsMsg::request(Method::CancelDvrEntry).with_s64("id", i64::from(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_without_digest() {
        let msg = authenticate("user", None);
        assert_eq!(msg.method(), Some("authenticate"));
        assert_eq!(msg.get_str("username"), Some("user"));
        assert!(!msg.contains("digest"));
    }

    #[test]
    fn test_authenticate_with_digest() {
        let msg = authenticate("user", Some(&[7u8; 20]));
        assert_eq!(msg.get_bin("digest").map(|d| d.len()), Some(20));
    }

    #[test]
    fn test_add_dvr_entry_optional_fields() {
        let entry = NewDvrEntry {
            channel_id: 4,
            start: 1000,
            stop: 2000,
            title: "Match".into(),
            event_id: Some(55),
            ..Default::default()
        };
        let msg = add_dvr_entry(&entry);
        assert_eq!(msg.get_u32("channelId"), Some(4));
        assert_eq!(msg.get_u32("eventId"), Some(55));
        assert!(!msg.contains("priority"));
        assert!(!msg.contains("startExtra"));
    }

    #[test]
    fn test_update_dvr_entry_only_changed_fields() {
        let msg = update_dvr_entry(&DvrEntryChanges {
            id: 9,
            title: Some("Renamed".into()),
            ..Default::default()
        });
        assert_eq!(msg.get_u32("id"), Some(9));
        assert_eq!(msg.get_str("title"), Some("Renamed"));
        assert!(!msg.contains("start"));
        assert!(!msg.contains("description"));
    }
}
