//! Request/reply plumbing to the DAS producer

use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// A single-flight request/reply channel
pub trait Transport {
    /// Send one request and block for its multipart reply, at most for the configured timeout
    fn request(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>>;
    /// Throw away the socket and open a new one on the same context
    fn reconnect(&mut self) -> Result<()>;
    /// Throw away the socket and the context behind it
    fn reset(&mut self) -> Result<()>;
    /// Release everything. Requests after this fail.
    fn close(&mut self);
}

/// Encode a request for everything newer than `last_seen`
pub fn request_bytes(last_seen: f64) -> [u8; 8] {
    last_seen.to_ne_bytes()
}

/// ZeroMQ REQ client
pub struct ZmqTransport {
    endpoint: String,
    timeout: Duration,
    // Field order matters: the socket must drop before its context
    socket: Option<zmq::Socket>,
    context: Option<zmq::Context>,
}

fn zmq_err(context: &'static str) -> impl Fn(zmq::Error) -> Error {
    move |source| Error::Transport { context, source }
}

impl ZmqTransport {
    /// Create a context and a connected socket for `tcp://host:port`
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let mut transport = Self {
            endpoint: format!("tcp://{host}:{port}"),
            timeout,
            socket: None,
            context: Some(zmq::Context::new()),
        };
        transport.open_socket()?;
        Ok(transport)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn open_socket(&mut self) -> Result<()> {
        self.socket = None;
        let ctx = self
            .context
            .as_ref()
            .ok_or_else(|| Error::Unexpected("transport context is closed".into()))?;
        let socket = ctx.socket(zmq::REQ).map_err(zmq_err("socket creation"))?;
        let timeout_ms = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);
        socket
            .set_rcvtimeo(timeout_ms)
            .map_err(zmq_err("setting receive timeout"))?;
        socket
            .set_sndtimeo(timeout_ms)
            .map_err(zmq_err("setting send timeout"))?;
        // Pending requests on a dead socket are worthless
        socket.set_linger(0).map_err(zmq_err("setting linger"))?;
        socket
            .connect(&self.endpoint)
            .map_err(zmq_err("connect"))?;
        info!(endpoint = %self.endpoint, "Connected to producer");
        self.socket = Some(socket);
        Ok(())
    }

    fn timeout_or(&self, context: &'static str) -> impl Fn(zmq::Error) -> Error + '_ {
        move |source| match source {
            zmq::Error::EAGAIN => Error::TransportTimeout {
                timeout: self.timeout,
            },
            zmq::Error::EINTR => Error::Interrupted { context },
            source => Error::Transport { context, source },
        }
    }
}

impl Transport for ZmqTransport {
    fn request(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::Unexpected("transport socket is closed".into()))?;
        socket.send(payload, 0).map_err(self.timeout_or("send"))?;
        let reply = socket.recv_multipart(0).map_err(self.timeout_or("receive"))?;
        debug!(parts = reply.len(), "Reply received");
        Ok(reply)
    }

    fn reconnect(&mut self) -> Result<()> {
        self.open_socket()
    }

    fn reset(&mut self) -> Result<()> {
        self.socket = None;
        self.context = Some(zmq::Context::new());
        info!(endpoint = %self.endpoint, "Transport context recreated");
        self.open_socket()
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            info!(endpoint = %self.endpoint, "Disconnected from producer");
        }
        self.context = None;
    }
}

impl Drop for ZmqTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_encoding() {
        assert_eq!(request_bytes(0.0), [0u8; 8]);
        assert_eq!(f64::from_ne_bytes(request_bytes(1690449193.04)), 1690449193.04);
    }

    #[test]
    fn test_unanswered_request_times_out() {
        // Nobody listens here, so the send is queued and the receive runs out the clock
        let mut t = ZmqTransport::connect("127.0.0.1", 1, Duration::from_millis(50)).unwrap();
        let err = t.request(&request_bytes(0.0)).unwrap_err();
        assert!(matches!(err, Error::TransportTimeout { .. }));
        t.reconnect().unwrap();
        t.reset().unwrap();
        t.close();
        assert!(t.request(&request_bytes(0.0)).is_err());
    }
}
