//! Typed request surface shared by both correlation models.

use htsp_protocol::requests::{self, DvrEntryChanges, NewDvrEntry};
use htsp_protocol::{ClientError, DiskSpace, EpgEvent, HtsMsg, ProtocolError, SysTime};

/// Request/reply access to an HTSP server.
///
/// Implementors only provide [`request`](HtspRpc::request), which sends a
/// message with a fresh `seq` and returns the matching reply (already
/// checked for `error`/`noaccess`). The typed calls are built on top.
pub trait HtspRpc {
    fn request(&self, msg: HtsMsg) -> Result<HtsMsg, ClientError>;

    fn get_event(&self, event_id: u32) -> Result<EpgEvent, ClientError> {
        let reply = self.request(requests::get_event(event_id))?;
        Ok(EpgEvent::from_msg(&reply)?)
    }

    fn get_disk_space(&self) -> Result<DiskSpace, ClientError> {
        let reply = self.request(requests::get_disk_space())?;
        Ok(DiskSpace::from_msg(&reply)?)
    }

    fn get_sys_time(&self) -> Result<SysTime, ClientError> {
        let reply = self.request(requests::get_sys_time())?;
        Ok(SysTime::from_msg(&reply)?)
    }

    /// Schedule a recording; returns the new entry id.
    fn add_dvr_entry(&self, entry: &NewDvrEntry) -> Result<u32, ClientError> {
        let reply = self.request(requests::add_dvr_entry(entry))?;
        expect_success(&reply, "addDvrEntry")?;
        let id = reply
            .get_u32("id")
            .ok_or(ProtocolError::missing("id", "addDvrEntry reply"))?;
        Ok(id)
    }

    fn update_dvr_entry(&self, changes: &DvrEntryChanges) -> Result<(), ClientError> {
        let reply = self.request(requests::update_dvr_entry(changes))?;
        expect_success(&reply, "updateDvrEntry")
    }

    fn delete_dvr_entry(&self, id: u32) -> Result<(), ClientError> {
        let reply = self.request(requests::delete_dvr_entry(id))?;
        expect_success(&reply, "deleteDvrEntry")
    }

    /// Stop an in-progress recording, keeping what was recorded.
    fn cancel_dvr_entry(&self, id: u32) -> Result<(), ClientError> {
        let reply = self.request(requests::cancel_dvr_entry(id))?;
        expect_success(&reply, "cancelDvrEntry")
    }
}

/// DVR replies carry `success`; 0 means rejected.
fn expect_success(reply: &HtsMsg, method: &str) -> Result<(), ClientError> {
    match reply.get_s64("success") {
        Some(0) => Err(ClientError::ServerError(format!("{} rejected", method))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htsp_protocol::Method;
    use parking_lot::Mutex;

    /// Answers every request with a canned reply and records what was sent.
    struct Canned {
        reply: HtsMsg,
        sent: Mutex<Vec<HtsMsg>>,
    }

    impl Canned {
        fn new(reply: HtsMsg) -> Self {
            Self {
                reply,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl HtspRpc for Canned {
        fn request(&self, msg: HtsMsg) -> Result<HtsMsg, ClientError> {
            self.sent.lock().push(msg);
            Ok(self.reply.clone())
        }
    }

    #[test]
    fn test_get_event() {
        let rpc = Canned::new(
            HtsMsg::new()
                .with_s64("eventId", 12)
                .with_s64("start", 100)
                .with_s64("stop", 200)
                .with_str("title", "News"),
        );
        let event = rpc.get_event(12).unwrap();
        assert_eq!(event.id, 12);
        assert_eq!(event.title, "News");
        assert_eq!(rpc.sent.lock()[0].get_u32("eventId"), Some(12));
    }

    #[test]
    fn test_get_event_malformed_reply() {
        let rpc = Canned::new(HtsMsg::new().with_s64("eventId", 12));
        assert!(matches!(
            rpc.get_event(12),
            Err(ClientError::Protocol(ProtocolError::MissingField { .. }))
        ));
    }

    #[test]
    fn test_add_dvr_entry_returns_id() {
        let rpc = Canned::new(HtsMsg::new().with_s64("success", 1).with_s64("id", 77));
        let id = rpc
            .add_dvr_entry(&NewDvrEntry {
                channel_id: 3,
                start: 10,
                stop: 20,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(id, 77);
        assert_eq!(
            Method::of(&rpc.sent.lock()[0]),
            Some(Method::AddDvrEntry)
        );
    }

    #[test]
    fn test_dvr_rejection() {
        let rpc = Canned::new(HtsMsg::new().with_s64("success", 0));
        assert!(matches!(
            rpc.delete_dvr_entry(5),
            Err(ClientError::ServerError(_))
        ));
        assert!(rpc.cancel_dvr_entry(5).is_err());
    }

    #[test]
    fn test_disk_space() {
        let rpc = Canned::new(
            HtsMsg::new()
                .with_s64("freediskspace", 1 << 30)
                .with_s64("totaldiskspace", 1 << 32),
        );
        let space = rpc.get_disk_space().unwrap();
        assert_eq!(space.free_bytes, 1 << 30);
        assert_eq!(space.total_bytes, 1 << 32);
    }
}
