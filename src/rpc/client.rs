use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};

use crate::config::Endpoint;
use crate::error::{Error, Phase, Result};
use crate::protocol::{encode_request, FrameReader, Response, DATA_FIELD};
use crate::rpc::{ECHO_METHOD, QUIT_METHOD};

/// Client bound to one service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcClient {
    endpoint: Endpoint,
    timeout: Option<Duration>,
}

impl RpcClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            timeout: None,
        }
    }

    /// Bounds connect, send and receive. `None` leaves them to the OS.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Performs one call and returns the reply document as decoded JSON.
    pub fn call<T: Serialize + ?Sized>(&self, method: &str, data: &T) -> Result<Value> {
        let data = serde_json::to_value(data)?;
        let frame = encode_request(method, &data)?;

        let mut stream = self.connect()?;
        stream
            .write_all(&frame)
            .and_then(|()| stream.flush())
            .map_err(|err| Error::transport(&self.endpoint, Phase::Send, err))?;

        let mut reader = FrameReader::new(stream, self.endpoint.clone());
        let reply = reader.read_value()?;
        log::trace!("{} {method} -> {reply}", self.endpoint);
        Ok(reply)
    }

    /// Like [`call`](Self::call) but returns only the `__data` field,
    /// turning a remote `__error` into a protocol error.
    pub fn call_data<T: Serialize + ?Sized>(&self, method: &str, data: &T) -> Result<Value> {
        let reply = self.call(method, data)?;
        if reply.get(DATA_FIELD).is_none() {
            return Err(Error::Protocol(format!(
                "{method} reply from {} has no {DATA_FIELD} field",
                self.endpoint
            )));
        }
        let response: Response = serde_json::from_value(reply)?;
        match response.error {
            Some(message) => Err(Error::Protocol(format!(
                "{method} failed on {}: {message}",
                self.endpoint
            ))),
            None => Ok(response.data),
        }
    }

    /// Sends `echo` and reports whether the reply data equals `text`.
    pub fn echo(&self, text: &str) -> Result<bool> {
        let reply = self.call(ECHO_METHOD, &json!({ "string": text }))?;
        Ok(reply.get(DATA_FIELD).and_then(Value::as_str) == Some(text))
    }

    pub fn quit(&self, reason: &str) -> Result<Value> {
        self.call(QUIT_METHOD, &json!({ "reason": reason }))
    }

    fn connect(&self) -> Result<TcpStream> {
        let connect_err = |err| Error::transport(&self.endpoint, Phase::Connect, err);
        let addrs: Vec<SocketAddr> = (self.endpoint.address.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(connect_err)?
            .collect();

        let stream = match self.timeout {
            None => TcpStream::connect(addrs.as_slice()).map_err(connect_err)?,
            Some(timeout) => connect_any(&addrs, timeout).map_err(connect_err)?,
        };
        stream
            .set_read_timeout(self.timeout)
            .and_then(|()| stream.set_write_timeout(self.timeout))
            .map_err(connect_err)?;
        Ok(stream)
    }
}

fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "no addresses to connect to")
    }))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::{encode_message, frame, FrameReader, Request};
    use crate::rpc::{service_dispatch, RpcServer, PROBE_STRING};

    fn spawn_stub() -> Endpoint {
        let server = RpcServer::bind(&Endpoint::new("127.0.0.1", 0)).unwrap();
        let endpoint = server.local_endpoint().clone();
        thread::spawn(move || server.serve(service_dispatch));
        endpoint
    }

    /// Accepts one connection, records the request, replies with `reply`
    /// one byte per write.
    fn one_shot(reply: Vec<u8>) -> (Endpoint, thread::JoinHandle<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = FrameReader::new(stream, Endpoint::new("127.0.0.1", port));
            let request = reader.read_request().unwrap();
            let mut stream = reader.into_inner();
            for byte in reply {
                stream.write_all(&[byte]).unwrap();
                stream.flush().unwrap();
            }
            request
        });
        (Endpoint::new("127.0.0.1", port), handle)
    }

    #[test]
    fn echo_against_stub() {
        let client = RpcClient::new(spawn_stub());
        assert!(client.echo(PROBE_STRING).unwrap());
        assert!(client.echo("Ünïcødé").unwrap());
    }

    #[test]
    fn call_returns_raw_reply() {
        let reply = encode_message(&json!({"__data": "hello", "__id": 7})).unwrap();
        let (endpoint, peer) = one_shot(reply);
        let client = RpcClient::new(endpoint);
        let value = client.call("echo", &json!({"string": "hello"})).unwrap();
        assert_eq!(value, json!({"__data": "hello", "__id": 7}));

        let request = peer.join().unwrap();
        assert_eq!(request.method, "echo");
        assert_eq!(request.data, json!({"string": "hello"}));
    }

    #[test]
    fn call_data_surfaces_remote_error() {
        let client = RpcClient::new(spawn_stub());
        let err = client.call_data("no_such_method", &json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        let data = client.call_data("echo", &json!({"string": "x"})).unwrap();
        assert_eq!(data, json!("x"));
    }

    #[test]
    fn call_data_requires_data_field() {
        let reply = encode_message(&json!({"status": "ok"})).unwrap();
        let (endpoint, _peer) = one_shot(reply);
        let err = RpcClient::new(endpoint)
            .call_data("echo", &json!({"string": "x"}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn malformed_reply_is_protocol_error() {
        let (endpoint, _peer) = one_shot(frame(b"{\"__data\": ").unwrap());
        let err = RpcClient::new(endpoint).call("echo", &json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn refused_connection_is_transport_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = RpcClient::new(Endpoint::new("127.0.0.1", port))
            .call("echo", &json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::Transport { phase: Phase::Connect, .. }));
    }

    #[test]
    fn peer_closing_early_is_receive_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&[0, 0, 0, 10, b'{']).unwrap();
        });
        let err = RpcClient::new(Endpoint::new("127.0.0.1", port))
            .call("echo", &json!({}))
            .unwrap_err();
        peer.join().unwrap();
        assert!(matches!(err, Error::Transport { phase: Phase::Receive, .. }));
    }

    #[test]
    fn timeout_bounds_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let _peer = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            let _ = done_rx.recv();
        });
        let client = RpcClient::new(Endpoint::new("127.0.0.1", port))
            .with_timeout(Some(Duration::from_millis(100)));
        let err = client.call("echo", &json!({})).unwrap_err();
        assert!(matches!(err, Error::Transport { phase: Phase::Receive, .. }));
        let _ = done_tx.send(());
    }
}
