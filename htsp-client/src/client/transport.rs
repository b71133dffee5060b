//! Blocking TCP transport carrying length-prefixed frames.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace, warn};
use parking_lot::Mutex;

use htsp_protocol::{decode_frame_len, ClientError, FRAME_HEADER_SIZE};

/// Bytes requested from the socket per read call.
const READ_CHUNK: usize = 64 * 1024;

/// One TCP connection to the server.
///
/// Reads and writes may happen from different threads. Bytes of a frame
/// that did not fully arrive before a read timeout stay buffered, so a
/// timeout never desynchronises the stream.
pub struct Transport {
    stream: TcpStream,
    peer: SocketAddr,
    /// Received bytes not yet returned as a frame.
    read_buf: Mutex<BytesMut>,
    /// Serialises whole-frame writes.
    write_lock: Mutex<()>,
}

impl Transport {
    /// Connect to `addr` (`host:port`), trying each resolved address.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let addrs = addr
            .to_socket_addrs()
            .map_err(|e| ClientError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        let mut last_err = None;
        for sock_addr in addrs {
            debug!("Connecting to {}...", sock_addr);
            match TcpStream::connect_timeout(&sock_addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to {}", sock_addr);
                    return Ok(Self::from_stream(stream, sock_addr));
                }
                Err(e) => {
                    warn!("Connect to {} failed: {}", sock_addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(ClientError::ConnectionFailed(match last_err {
            Some(e) => format!("{}: {}", addr, e),
            None => format!("{}: no addresses resolved", addr),
        }))
    }

    fn from_stream(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            read_buf: Mutex::new(BytesMut::with_capacity(READ_CHUNK)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Write one already-encoded frame.
    pub fn send_frame(&self, frame: &[u8]) -> Result<(), ClientError> {
        let _guard = self.write_lock.lock();
        (&self.stream).write_all(frame)?;
        (&self.stream).flush()?;
        trace!("Sent frame ({} bytes)", frame.len());
        Ok(())
    }

    /// Read one frame body.
    ///
    /// Returns `Ok(None)` if no complete frame arrived within `timeout`;
    /// `None` waits indefinitely. An orderly close by the peer is
    /// [`ClientError::ConnectionClosed`].
    pub fn read_frame(&self, timeout: Option<Duration>) -> Result<Option<Bytes>, ClientError> {
        let mut buf = self.read_buf.lock();

        // A zero duration means "no timeout" to the socket API.
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.stream.set_read_timeout(timeout)?;

        loop {
            if let Some(len) = decode_frame_len(&buf)? {
                let total = FRAME_HEADER_SIZE + len as usize;
                if buf.len() >= total {
                    buf.advance(FRAME_HEADER_SIZE);
                    return Ok(Some(buf.split_to(len as usize).freeze()));
                }
                let need = total - buf.len();
                buf.reserve(need);
            }

            let start = buf.len();
            buf.resize(start + READ_CHUNK, 0);
            match (&self.stream).read(&mut buf[start..]) {
                Ok(0) => {
                    buf.truncate(start);
                    debug!("Connection closed by server {}", self.peer);
                    return Err(ClientError::ConnectionClosed);
                }
                Ok(n) => buf.truncate(start + n),
                Err(e) => {
                    buf.truncate(start);
                    match e.kind() {
                        ErrorKind::WouldBlock | ErrorKind::TimedOut => return Ok(None),
                        ErrorKind::Interrupted => continue,
                        _ => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Shut down both directions; blocked readers return promptly.
    pub fn shutdown(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            // Already closed by the peer.
            trace!("Shutdown of {}: {}", self.peer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = thread::spawn(move || listener.accept().unwrap().0);
        let transport = Transport::connect(&addr, Duration::from_secs(2)).unwrap();
        (transport, accept.join().unwrap())
    }

    #[test]
    fn test_read_frame_across_partial_writes() {
        let (transport, mut server) = pair();

        server.write_all(&[0, 0, 0, 3, b'a']).unwrap();
        assert_eq!(
            transport.read_frame(Some(Duration::from_millis(50))).unwrap(),
            None
        );

        server.write_all(b"bc").unwrap();
        let frame = transport
            .read_frame(Some(Duration::from_secs(2)))
            .unwrap()
            .unwrap();
        assert_eq!(&frame[..], b"abc");
    }

    #[test]
    fn test_two_frames_in_one_write() {
        let (transport, mut server) = pair();
        server
            .write_all(&[0, 0, 0, 1, b'x', 0, 0, 0, 0, 0, 0, 0, 2, b'y', b'z'])
            .unwrap();

        let timeout = Some(Duration::from_secs(2));
        assert_eq!(&transport.read_frame(timeout).unwrap().unwrap()[..], b"x");
        assert!(transport.read_frame(timeout).unwrap().unwrap().is_empty());
        assert_eq!(&transport.read_frame(timeout).unwrap().unwrap()[..], b"yz");
    }

    #[test]
    fn test_peer_close_is_reported() {
        let (transport, server) = pair();
        drop(server);
        assert_eq!(
            transport.read_frame(Some(Duration::from_secs(2))),
            Err(ClientError::ConnectionClosed)
        );
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let (transport, mut server) = pair();
        server.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert!(matches!(
            transport.read_frame(Some(Duration::from_secs(2))),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_shutdown_unblocks_reader() {
        let (transport, _server) = pair();
        let transport = std::sync::Arc::new(transport);
        let reader = {
            let transport = transport.clone();
            thread::spawn(move || transport.read_frame(None))
        };
        thread::sleep(Duration::from_millis(50));
        transport.shutdown();
        assert!(reader.join().unwrap().is_err());
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            Transport::connect(&addr, Duration::from_secs(1)),
            Err(ClientError::ConnectionFailed(_))
        ));
    }
}
