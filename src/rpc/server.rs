use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::config::Endpoint;
use crate::error::{Error, Phase, Result};
use crate::protocol::{encode_message, FrameReader, Request, Response};
use crate::rpc::{ECHO_METHOD, QUIT_METHOD};

/// What a handler wants done with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Reply with `__data` and keep serving.
    Reply(Value),
    /// Reply with `__error` and keep serving.
    Fail(String),
    /// Reply with `__data`, then stop serving.
    ReplyAndStop(Value),
}

/// Per-connection read/write timeout unless overridden.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive accept failures tolerated before `serve` gives up.
pub const MAX_ACCEPT_FAILURES: u32 = 16;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Blocking single-connection responder.
pub struct RpcServer {
    listener: TcpListener,
    endpoint: Endpoint,
    connection_timeout: Option<Duration>,
}

impl RpcServer {
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        let listener = TcpListener::bind((endpoint.address.as_str(), endpoint.port))?;
        Self::from_listener(listener)
    }

    pub fn from_listener(listener: TcpListener) -> Result<Self> {
        let local = listener.local_addr()?;
        Ok(Self {
            listener,
            endpoint: Endpoint::new(local.ip().to_string(), local.port()),
            connection_timeout: Some(CONNECTION_TIMEOUT),
        })
    }

    /// Bounds how long one accepted connection may stall a read or write.
    /// `None` waits forever.
    pub fn with_connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// The bound endpoint, with the real port if bound to port 0.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Serves connections until a handler returns [`Dispatch::ReplyAndStop`].
    ///
    /// Returns the number of requests answered. A connection that fails or
    /// stalls mid-exchange is logged and dropped; serving continues. After
    /// [`MAX_ACCEPT_FAILURES`] failed accepts in a row the last error is
    /// returned.
    pub fn serve<F>(&self, mut handler: F) -> Result<u64>
    where
        F: FnMut(&Request) -> Dispatch,
    {
        let mut served = 0u64;
        let mut accept_failures = 0u32;
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => {
                    accept_failures = 0;
                    stream
                }
                Err(err) => {
                    accept_failures += 1;
                    if accept_failures >= MAX_ACCEPT_FAILURES {
                        log::error!(
                            "giving up on {} after {accept_failures} failed accepts",
                            self.endpoint
                        );
                        return Err(err.into());
                    }
                    log::warn!("accept failed on {}: {err}", self.endpoint);
                    thread::sleep(ACCEPT_BACKOFF * accept_failures);
                    continue;
                }
            };
            match self.serve_connection(stream, &mut handler) {
                Ok(stop) => {
                    served += 1;
                    if stop {
                        break;
                    }
                }
                Err(err) => log::warn!("dropped connection on {}: {err}", self.endpoint),
            }
        }
        Ok(served)
    }

    fn serve_connection<F>(&self, stream: TcpStream, handler: &mut F) -> Result<bool>
    where
        F: FnMut(&Request) -> Dispatch,
    {
        let peer = stream
            .peer_addr()
            .map(|addr| Endpoint::new(addr.ip().to_string(), addr.port()))
            .unwrap_or_else(|_| self.endpoint.clone());
        stream.set_read_timeout(self.connection_timeout)?;
        stream.set_write_timeout(self.connection_timeout)?;
        let mut reader = FrameReader::new(stream, peer.clone());
        let request = reader.read_request()?;
        log::debug!("{} <- {} {}", self.endpoint, request.method, request.data);

        let (response, stop) = match handler(&request) {
            Dispatch::Reply(data) => (Response::ok(data), false),
            Dispatch::Fail(message) => (Response::failed(message), false),
            Dispatch::ReplyAndStop(data) => (Response::ok(data), true),
        };

        let bytes = encode_message(&response)?;
        let mut stream = reader.into_inner();
        stream
            .write_all(&bytes)
            .and_then(|()| stream.flush())
            .map_err(|err| Error::transport(&peer, Phase::Send, err))?;
        Ok(stop)
    }
}

/// Behaviour of a plain managed service: `echo` returns the `string` field
/// of its payload, `quit` replies and stops.
pub fn service_dispatch(request: &Request) -> Dispatch {
    match request.method.as_str() {
        ECHO_METHOD => match request.data.get("string") {
            Some(text) => Dispatch::Reply(text.clone()),
            None => Dispatch::Fail("echo needs a string field".to_string()),
        },
        QUIT_METHOD => {
            let reason = request
                .data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("no reason given");
            log::info!("quit requested: {reason}");
            Dispatch::ReplyAndStop(Value::Null)
        }
        other => Dispatch::Fail(format!("unknown method {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::rpc::{RpcClient, QUIT_REASON};

    #[test]
    fn dispatch_table() {
        assert_eq!(
            service_dispatch(&Request::new("echo", json!({"string": "hi"}))),
            Dispatch::Reply(json!("hi"))
        );
        assert_eq!(
            service_dispatch(&Request::new("quit", json!({"reason": QUIT_REASON}))),
            Dispatch::ReplyAndStop(Value::Null)
        );
        assert!(matches!(
            service_dispatch(&Request::new("echo", json!({}))),
            Dispatch::Fail(_)
        ));
        assert!(matches!(
            service_dispatch(&Request::new("restart", json!({}))),
            Dispatch::Fail(_)
        ));
    }

    #[test]
    fn serve_stops_after_quit() {
        let server = RpcServer::bind(&Endpoint::new("127.0.0.1", 0)).unwrap();
        let client = RpcClient::new(server.local_endpoint().clone());
        let handle = thread::spawn(move || server.serve(service_dispatch));

        assert!(client.echo("one").unwrap());
        assert!(client.echo("two").unwrap());
        let reply = client.quit(QUIT_REASON).unwrap();
        assert_eq!(reply, json!({"__data": null}));

        assert_eq!(handle.join().unwrap().unwrap(), 3);
    }

    #[test]
    fn silent_client_times_out_and_serving_continues() {
        let server = RpcServer::bind(&Endpoint::new("127.0.0.1", 0))
            .unwrap()
            .with_connection_timeout(Some(Duration::from_millis(100)));
        let endpoint = server.local_endpoint().clone();
        let handle = thread::spawn(move || server.serve(service_dispatch));

        let _silent = TcpStream::connect((endpoint.address.as_str(), endpoint.port)).unwrap();

        let client = RpcClient::new(endpoint).with_timeout(Some(Duration::from_secs(5)));
        assert!(client.echo("behind a silent peer").unwrap());
        client.quit(QUIT_REASON).unwrap();
        assert_eq!(handle.join().unwrap().unwrap(), 2);
    }

    #[test]
    fn broken_connection_does_not_stop_server() {
        let server = RpcServer::bind(&Endpoint::new("127.0.0.1", 0)).unwrap();
        let endpoint = server.local_endpoint().clone();
        let handle = thread::spawn(move || server.serve(service_dispatch));

        {
            let mut raw = TcpStream::connect((endpoint.address.as_str(), endpoint.port)).unwrap();
            raw.write_all(&[0, 0]).unwrap();
        }

        let client = RpcClient::new(endpoint);
        assert!(client.echo("still here").unwrap());
        client.quit(QUIT_REASON).unwrap();
        assert_eq!(handle.join().unwrap().unwrap(), 2);
    }
}
