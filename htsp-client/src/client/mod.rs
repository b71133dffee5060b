//! HTSP client: transport, session, reader thread, demuxer and pool.

pub mod buffer;
pub mod demux;
pub mod pool;
pub mod rpc;
pub mod session;
pub mod state;
pub mod tracker;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::MessageQueue;
pub use demux::{DemuxPacket, DemuxState, Demuxer, Packet};
pub use pool::{ConnectionPool, PooledConnection};
pub use rpc::HtspRpc;
pub use session::{ServerInfo, Session};
pub use state::ServerState;
pub use tracker::{HtspClient, SyncState};
pub use transport::Transport;
