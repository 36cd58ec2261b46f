use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use tracing::warn;

use crate::sink::{NetworkSink, PostOutcome};

const DEFAULT_PORT: u16 = 515;
const RESPONSE_PEEK_BYTES: usize = 256;

#[derive(Clone, Debug)]
pub struct TcpSinkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: StdDuration,
    pub io_timeout: StdDuration,
}

impl TcpSinkConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            connect_timeout: StdDuration::from_secs(30),
            io_timeout: StdDuration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct State {
    stream: Option<TcpStream>,
}

/// Raw-JSON TCP sink: opens a plain TCP connection, writes the batch body,
/// reads a small response. Grounded on the connect/disconnect bookkeeping
/// of `flux-network`'s `ConnState`, adapted from its non-blocking `mio`
/// poll loop to a blocking connect/post/close contract
/// — the sender loop drives one sink synchronously per iteration rather
/// than running its own event loop (see DESIGN.md).
pub struct TcpSink {
    config: TcpSinkConfig,
    state: Mutex<State>,
}

impl TcpSink {
    pub fn new(config: TcpSinkConfig) -> Self {
        Self { config, state: Mutex::new(State::default()) }
    }
}

impl NetworkSink for TcpSink {
    fn connect(&self) -> bool {
        let mut state = self.state.lock().expect("tcp sink mutex poisoned");
        if state.stream.is_some() {
            return true;
        }
        let addr = format!("{}:{}", self.config.host, self.config.port);
        match std::net::ToSocketAddrs::to_socket_addrs(&addr) {
            Ok(mut addrs) => {
                let Some(sockaddr) = addrs.next() else {
                    warn!(%addr, "no resolvable address for tcp sink");
                    return false;
                };
                match TcpStream::connect_timeout(&sockaddr, self.config.connect_timeout) {
                    Ok(stream) => {
                        let _ = stream.set_read_timeout(Some(self.config.io_timeout));
                        let _ = stream.set_write_timeout(Some(self.config.io_timeout));
                        state.stream = Some(stream);
                        true
                    }
                    Err(err) => {
                        warn!(%addr, error = %err, "tcp sink connect failed");
                        false
                    }
                }
            }
            Err(err) => {
                warn!(%addr, error = %err, "tcp sink address resolution failed");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().expect("tcp sink mutex poisoned").stream.is_some()
    }

    fn post(&self, bytes: &[u8]) -> PostOutcome {
        let mut state = self.state.lock().expect("tcp sink mutex poisoned");
        let Some(stream) = state.stream.as_mut() else {
            return PostOutcome::Transient("sink not connected".into());
        };

        if let Err(err) = stream.write_all(bytes) {
            state.stream = None;
            return PostOutcome::Transient(format!("partial send: {err}"));
        }

        let mut response = [0u8; RESPONSE_PEEK_BYTES];
        match stream.read(&mut response) {
            Ok(_) | Err(_) => PostOutcome::Success,
        }
    }

    fn close(&self) {
        self.state.lock().expect("tcp sink mutex poisoned").stream = None;
    }

    fn get_collector_version(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn connect_post_roundtrip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 64];
            let n = conn.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], br#"{"k":1}"#);
            conn.write_all(b"ok").unwrap();
        });

        let mut config = TcpSinkConfig::new(addr.ip().to_string());
        config.port = addr.port();
        let sink = TcpSink::new(config);
        assert!(sink.connect());
        let outcome = sink.post(br#"{"k":1}"#);
        assert_eq!(outcome, PostOutcome::Success);
        server.join().unwrap();
    }

    #[test]
    fn post_without_connect_is_transient() {
        let sink = TcpSink::new(TcpSinkConfig::new("127.0.0.1"));
        assert!(matches!(sink.post(b"x"), PostOutcome::Transient(_)));
    }

    #[test]
    fn connect_failure_against_closed_port_is_false() {
        let sink = TcpSink::new(TcpSinkConfig::new("127.0.0.1").tap_port(1));
        assert!(!sink.connect());
    }
}

#[cfg(test)]
impl TcpSinkConfig {
    fn tap_port(mut self, port: u16) -> Self {
        self.port = port;
        self.connect_timeout = StdDuration::from_millis(200);
        self
    }
}
