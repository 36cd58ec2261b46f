use std::sync::Mutex;
use std::time::Duration as StdDuration;

use reqwest::blocking::{Client, ClientBuilder};
use reqwest::redirect::Policy;
use reqwest::{StatusCode, Url};
use tracing::warn;

use crate::sink::{NetworkSink, PostOutcome, SinkError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 5;

#[derive(Clone, Debug)]
pub struct HttpSinkConfig {
    pub endpoint: Url,
    pub api_token: Option<String>,
    /// PEM bytes for a custom root certificate, standing in for the
    /// `TlsMaterialLoader` collaborator's opaque handle.
    pub tls_root_cert: Option<Vec<u8>>,
    pub connect_timeout: StdDuration,
    pub send_timeout: StdDuration,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("https://localhost/events").expect("valid default url"),
            api_token: None,
            tls_root_cert: None,
            connect_timeout: StdDuration::from_secs(DEFAULT_TIMEOUT_SECS),
            send_timeout: StdDuration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

struct State {
    client: Option<Client>,
}

/// POSTs batch bodies to an HTTP(S) collector. Built on
/// `reqwest::blocking` — the teacher's dependency tables have no HTTP
/// client, so this follows the convention the wider retrieval pack uses
/// for talking HTTP (see DESIGN.md).
pub struct HttpSink {
    config: HttpSinkConfig,
    state: Mutex<State>,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, SinkError> {
        if config.endpoint.scheme() != "http" && config.endpoint.scheme() != "https" {
            return Err(SinkError::InvalidConfig(format!("unsupported scheme {}", config.endpoint.scheme())));
        }
        Ok(Self { config, state: Mutex::new(State { client: None }) })
    }

    fn build_client(&self) -> reqwest::Result<Client> {
        let mut builder = ClientBuilder::new()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.send_timeout)
            .redirect(Policy::limited(MAX_REDIRECTS));

        if let Some(pem) = &self.config.tls_root_cert {
            if let Ok(cert) = reqwest::Certificate::from_pem(pem) {
                builder = builder.add_root_certificate(cert);
            } else {
                warn!("failed to parse configured TLS root certificate, falling back to system roots");
            }
        }
        builder.build()
    }

    fn classify_status(status: StatusCode) -> PostOutcome {
        if status == StatusCode::OK || status == StatusCode::ACCEPTED {
            PostOutcome::Success
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            PostOutcome::FatalAuth(format!("collector rejected credentials: {status}"))
        } else {
            PostOutcome::Transient(format!("collector returned {status}"))
        }
    }
}

impl NetworkSink for HttpSink {
    fn connect(&self) -> bool {
        let mut state = self.state.lock().expect("http sink mutex poisoned");
        if state.client.is_some() {
            return true;
        }
        match self.build_client() {
            Ok(client) => {
                state.client = Some(client);
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to build http client");
                false
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().expect("http sink mutex poisoned").client.is_some()
    }

    fn post(&self, bytes: &[u8]) -> PostOutcome {
        let client = {
            let state = self.state.lock().expect("http sink mutex poisoned");
            match &state.client {
                Some(c) => c.clone(),
                None => return PostOutcome::Transient("sink not connected".into()),
            }
        };

        let mut request = client
            .post(self.config.endpoint.clone())
            .header("Content-Type", "application/json")
            .body(bytes.to_vec());
        if let Some(token) = &self.config.api_token {
            request = request.header("Authorization", format!("token {token}"));
        }

        match request.send() {
            Ok(response) => Self::classify_status(response.status()),
            Err(err) if err.is_timeout() || err.is_connect() => PostOutcome::Transient(format!("transport error: {err}")),
            Err(err) => PostOutcome::Transient(format!("request failed: {err}")),
        }
    }

    fn close(&self) {
        self.state.lock().expect("http sink mutex poisoned").client = None;
    }

    fn get_collector_version(&self) -> Option<String> {
        let client = self.state.lock().expect("http sink mutex poisoned").client.clone()?;
        let mut version_url = self.config.endpoint.clone();
        version_url.set_path("/version");
        client.get(version_url).send().ok()?.text().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_scheme() {
        let mut config = HttpSinkConfig::default();
        config.endpoint = Url::parse("ftp://example.com").unwrap();
        assert!(HttpSink::new(config).is_err());
    }

    #[test]
    fn status_classification() {
        assert_eq!(HttpSink::classify_status(StatusCode::OK), PostOutcome::Success);
        assert_eq!(HttpSink::classify_status(StatusCode::ACCEPTED), PostOutcome::Success);
        assert!(matches!(HttpSink::classify_status(StatusCode::FORBIDDEN), PostOutcome::FatalAuth(_)));
        assert!(matches!(HttpSink::classify_status(StatusCode::UNAUTHORIZED), PostOutcome::FatalAuth(_)));
        assert!(matches!(HttpSink::classify_status(StatusCode::BAD_GATEWAY), PostOutcome::Transient(_)));
        assert!(matches!(HttpSink::classify_status(StatusCode::NOT_FOUND), PostOutcome::Transient(_)));
    }

    #[test]
    fn connect_then_close_resets_state() {
        let sink = HttpSink::new(HttpSinkConfig::default()).unwrap();
        assert!(!sink.is_connected());
        assert!(sink.connect());
        assert!(sink.is_connected());
        sink.close();
        assert!(!sink.is_connected());
    }
}
