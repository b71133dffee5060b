//! Scripted in-process HTSP server for tests.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;

use htsp_protocol::{decode_message, encode_frame, HtsMsg, HtsValue};

use crate::config::ConnectionConfig;

/// A loopback listener running a script per accepted connection.
pub struct FakeServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl FakeServer {
    /// Serve exactly one connection with `script`.
    pub fn start<F>(script: F) -> Self
    where
        F: FnOnce(&mut FakeConn) + Send + 'static,
    {
        let mut script = Some(script);
        Self::start_many(1, move |_, conn| {
            if let Some(script) = script.take() {
                script(conn);
            }
        })
    }

    /// Serve `count` connections one after another; the script gets the
    /// zero-based connection number.
    pub fn start_many<F>(count: usize, mut script: F) -> Self
    where
        F: FnMut(usize, &mut FakeConn) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            for n in 0..count {
                let (stream, _) = listener.accept().unwrap();
                let mut conn = FakeConn::new(stream);
                script(n, &mut conn);
            }
        });
        Self { addr, handle }
    }

    /// Client configuration pointing at this server, with short timeouts.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            connect_timeout: Duration::from_secs(2),
            response_timeout: Duration::from_secs(2),
            sync_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            ..ConnectionConfig::default()
        }
    }

    /// Wait for the script to finish, re-raising its assertion failures.
    pub fn join(self) {
        if let Err(panic) = self.handle.join() {
            std::panic::resume_unwind(panic);
        }
    }
}

/// Server end of one connection.
pub struct FakeConn {
    stream: TcpStream,
}

impl FakeConn {
    fn new(stream: TcpStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self { stream }
    }

    /// Next message from the client; panics if the client went away.
    pub fn recv(&mut self) -> HtsMsg {
        self.try_recv().expect("client closed the connection")
    }

    /// Next message, or `None` once the client closed the connection.
    pub fn try_recv(&mut self) -> Option<HtsMsg> {
        let mut len = [0u8; 4];
        match self.stream.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if matches!(e.kind(), ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset) => {
                return None;
            }
            Err(e) => panic!("fake server read failed: {}", e),
        }
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        self.stream.read_exact(&mut body).ok()?;
        Some(decode_message(Bytes::from(body)).unwrap())
    }

    pub fn send(&mut self, msg: &HtsMsg) {
        let frame = encode_frame(msg).unwrap();
        // The client may already be gone in shutdown tests.
        let _ = self.stream.write_all(&frame);
    }

    /// Send `msg` as the reply to `request`.
    pub fn reply(&mut self, request: &HtsMsg, msg: HtsMsg) {
        let seq = request.seq().expect("request without seq");
        let mut msg = msg;
        msg.set("seq", HtsValue::S64(i64::from(seq)));
        self.send(&msg);
    }

    /// Answer requests with an empty success reply until the client closes.
    pub fn expect_closed(&mut self) {
        while let Some(msg) = self.try_recv() {
            if msg.seq().is_some() {
                self.reply(&msg, HtsMsg::new());
            }
        }
    }
}

/// A minimal `hello` reply.
pub fn hello_reply(challenge: Option<&[u8]>) -> HtsMsg {
    let msg = HtsMsg::new()
        .with_s64("htspversion", 1)
        .with_str("servername", "fake")
        .with_str("serverversion", "0.1");
    match challenge {
        Some(c) => msg.with_bin("challenge", c.to_vec()),
        None => msg,
    }
}
