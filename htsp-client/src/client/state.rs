//! Channel, tag and recording maps maintained from push notifications.

use std::collections::HashMap;

use log::{trace, warn};

use htsp_protocol::{Channel, DvrEntry, HtsMsg, Method, ProtocolError, Tag};

/// Metadata mirrored from the server.
#[derive(Debug, Default, Clone)]
pub struct ServerState {
    pub channels: HashMap<u32, Channel>,
    pub tags: HashMap<u32, Tag>,
    pub recordings: HashMap<u32, DvrEntry>,
}

/// Whether a message changed anything the tracker must react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A metadata map was updated.
    Updated,
    /// `initialSyncCompleted` was seen.
    SyncCompleted,
    /// Not a metadata notification.
    Ignored,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.tags.clear();
        self.recordings.clear();
    }

    /// Apply one push notification.
    ///
    /// A notification missing a required field is an error and leaves the
    /// maps untouched.
    pub fn apply(&mut self, method: Method, msg: &HtsMsg) -> Result<Applied, ProtocolError> {
        match method {
            Method::ChannelAdd | Method::ChannelUpdate => {
                let id = required(msg, "channelId", "channelAdd/channelUpdate")?;
                self.channels
                    .entry(id)
                    .or_insert_with(|| Channel::new(id))
                    .apply_update(msg);
                trace!("{} {}", method, id);
            }
            Method::ChannelRemove => {
                let id = required(msg, "channelId", "channelRemove")?;
                if self.channels.remove(&id).is_none() {
                    warn!("channelRemove for unknown channel {}", id);
                }
            }
            Method::TagAdd | Method::TagUpdate => {
                let id = required(msg, "tagId", "tagAdd/tagUpdate")?;
                self.tags
                    .entry(id)
                    .or_insert_with(|| Tag::new(id))
                    .apply_update(msg);
                trace!("{} {}", method, id);
            }
            Method::TagRemove => {
                let id = required(msg, "tagId", "tagRemove")?;
                self.tags.remove(&id);
            }
            Method::DvrEntryAdd | Method::DvrEntryUpdate => {
                let entry = DvrEntry::from_msg(msg)?;
                trace!("{} {} ({})", method, entry.id, entry.state.name());
                self.recordings.insert(entry.id, entry);
            }
            Method::DvrEntryDelete => {
                let id = required(msg, "id", "dvrEntryDelete")?;
                self.recordings.remove(&id);
            }
            Method::InitialSyncCompleted => return Ok(Applied::SyncCompleted),
            _ => return Ok(Applied::Ignored),
        }
        Ok(Applied::Updated)
    }

    /// Channels ordered by display number, then id.
    pub fn sorted_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.channels.values().cloned().collect();
        channels.sort_by_key(|c| (c.number, c.id));
        channels
    }

    /// Members of `tag_id` in tag order, skipping ids with no channel.
    pub fn channels_in_tag(&self, tag_id: u32) -> Vec<Channel> {
        self.tags
            .get(&tag_id)
            .map(|tag| {
                tag.members
                    .iter()
                    .filter_map(|id| self.channels.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn required(msg: &HtsMsg, field: &'static str, context: &'static str) -> Result<u32, ProtocolError> {
    msg.get_u32(field)
        .ok_or(ProtocolError::missing(field, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use htsp_protocol::{DvrState, HtsValue};

    fn push(method: Method) -> HtsMsg {
        HtsMsg::request(method)
    }

    fn apply(state: &mut ServerState, msg: HtsMsg) -> Result<Applied, ProtocolError> {
        let method = Method::of(&msg).unwrap();
        state.apply(method, &msg)
    }

    #[test]
    fn test_channel_update_is_partial() {
        let mut state = ServerState::new();
        apply(
            &mut state,
            push(Method::ChannelAdd)
                .with_s64("channelId", 5)
                .with_str("channelName", "One")
                .with_str("channelIcon", "http://icons/1.png")
                .with_s64("channelNumber", 7)
                .with_list("tags", vec![HtsValue::S64(2), HtsValue::S64(3)]),
        )
        .unwrap();
        apply(
            &mut state,
            push(Method::ChannelUpdate)
                .with_s64("channelId", 5)
                .with_str("channelName", "One HD"),
        )
        .unwrap();

        let channel = &state.channels[&5];
        assert_eq!(channel.name, "One HD");
        assert_eq!(channel.icon, "http://icons/1.png");
        assert_eq!(channel.number, 7);
        assert_eq!(channel.tags, vec![2, 3]);
    }

    #[test]
    fn test_channel_number_fallbacks() {
        let mut state = ServerState::new();
        apply(&mut state, push(Method::ChannelAdd).with_s64("channelId", 5)).unwrap();
        assert_eq!(state.channels[&5].number, 5);

        apply(
            &mut state,
            push(Method::ChannelUpdate)
                .with_s64("channelId", 5)
                .with_s64("channelNumber", 0),
        )
        .unwrap();
        assert_eq!(state.channels[&5].number, 1005);
    }

    #[test]
    fn test_malformed_notification_is_rejected() {
        let mut state = ServerState::new();
        assert!(apply(&mut state, push(Method::ChannelAdd).with_str("channelName", "x")).is_err());
        assert!(apply(
            &mut state,
            push(Method::DvrEntryAdd).with_s64("id", 1).with_s64("channel", 2)
        )
        .is_err());
        assert!(state.channels.is_empty());
        assert!(state.recordings.is_empty());
    }

    #[test]
    fn test_remove_operations() {
        let mut state = ServerState::new();
        apply(&mut state, push(Method::ChannelAdd).with_s64("channelId", 1)).unwrap();
        apply(&mut state, push(Method::TagAdd).with_s64("tagId", 9)).unwrap();
        apply(&mut state, push(Method::ChannelRemove).with_s64("channelId", 1)).unwrap();
        apply(&mut state, push(Method::TagRemove).with_s64("tagId", 9)).unwrap();
        assert!(state.channels.is_empty());
        assert!(state.tags.is_empty());
    }

    #[test]
    fn test_dvr_entry_lifecycle() {
        let mut state = ServerState::new();
        let entry = |state: &str| {
            push(Method::DvrEntryUpdate)
                .with_s64("id", 3)
                .with_s64("channel", 1)
                .with_s64("start", 100)
                .with_s64("stop", 200)
                .with_str("state", state)
        };
        apply(&mut state, entry("scheduled")).unwrap();
        assert_eq!(state.recordings[&3].state, DvrState::Scheduled);

        apply(&mut state, entry("completed").with_str("error", "300")).unwrap();
        assert_eq!(state.recordings[&3].state, DvrState::Aborted);
        assert!(state.recordings[&3].error.is_empty());

        apply(&mut state, push(Method::DvrEntryDelete).with_s64("id", 3)).unwrap();
        assert!(state.recordings.is_empty());
    }

    #[test]
    fn test_sync_and_unrelated_methods() {
        let mut state = ServerState::new();
        assert_eq!(
            apply(&mut state, push(Method::InitialSyncCompleted)),
            Ok(Applied::SyncCompleted)
        );
        assert_eq!(
            apply(&mut state, push(Method::MuxPkt)),
            Ok(Applied::Ignored)
        );
    }

    #[test]
    fn test_queries() {
        let mut state = ServerState::new();
        for (id, number) in [(1, 30), (2, 10), (3, 20)] {
            apply(
                &mut state,
                push(Method::ChannelAdd)
                    .with_s64("channelId", id)
                    .with_s64("channelNumber", number),
            )
            .unwrap();
        }
        apply(
            &mut state,
            push(Method::TagAdd)
                .with_s64("tagId", 7)
                .with_list("members", vec![HtsValue::S64(3), HtsValue::S64(99), HtsValue::S64(1)]),
        )
        .unwrap();

        let order: Vec<u32> = state.sorted_channels().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![2, 3, 1]);

        let members: Vec<u32> = state.channels_in_tag(7).iter().map(|c| c.id).collect();
        assert_eq!(members, vec![3, 1]);
        assert!(state.channels_in_tag(8).is_empty());
    }
}
