use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use evtforward_batch::{Framing, HttpJsonFraming, NdjsonFraming};
use evtforward_config::{AgentConfig, TomlBookmarkStore};
use evtforward_events::{BookmarkStore, ChannelEventSource, Subscription, TailFeed, TailLine, drain_available};
use evtforward_network::{HttpSink, HttpSinkConfig, NetworkSink, TcpSink, TcpSinkConfig};
use evtforward_pool::{BufferPool, PoolPolicy};
use evtforward_queue::{BookmarkUpdate, MessageQueue};
use evtforward_timing::Duration;
use evtforward_watchdog::{Heart, Watchdog, WatchdogHandle};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::ingest::{EventIngestor, QueueTarget};
use crate::sender::{SenderLoop, SinkSlot};

const MAX_QUEUED: usize = 10_000;
const MAX_MSG_BYTES: usize = 64 * 1024;
const MAX_BUFFERS_PER_MESSAGE: usize = 16;
const MAX_BATCH: usize = 500;
const POOL_BUFFER_SIZE: usize = 4096;
const POOL_CHUNK_SIZE: usize = 64;
const WATCHDOG_TICK: Duration = Duration::from_millis(500);
const WATCHDOG_FAILURE_AFTER: Duration = Duration::from_secs(30);
const TAIL_POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);
const SHUTDOWN_POLL_INTERVAL: StdDuration = StdDuration::from_millis(200);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid primary collector url: {0}")]
    InvalidPrimaryUrl(url::ParseError),
    #[error("invalid secondary collector url: {0}")]
    InvalidSecondaryUrl(url::ParseError),
    #[error("sink configuration invalid: {0}")]
    InvalidSink(#[from] evtforward_network::SinkError),
}

fn build_sink(url: &Url, api_token: Option<String>) -> Result<Box<dyn NetworkSink>, RuntimeError> {
    match url.scheme() {
        "http" | "https" => {
            let config = HttpSinkConfig { endpoint: url.clone(), api_token, ..HttpSinkConfig::default() };
            Ok(Box::new(HttpSink::new(config)?))
        }
        _ => {
            let host = url.host_str().unwrap_or("127.0.0.1").to_string();
            let mut tcp_config = TcpSinkConfig::new(host);
            if let Some(port) = url.port() {
                tcp_config.port = port;
            }
            Ok(Box::new(TcpSink::new(tcp_config)))
        }
    }
}

fn build_queue_target(http_framing: bool) -> QueueTarget {
    let pool = Arc::new(BufferPool::new(POOL_BUFFER_SIZE, POOL_CHUNK_SIZE, PoolPolicy::ShrinkAtSlack(50)));
    let queue = Arc::new(MessageQueue::new(MAX_QUEUED, MAX_MSG_BYTES, MAX_BUFFERS_PER_MESSAGE));
    QueueTarget::new(queue, pool, http_framing)
}

fn clone_target(target: &QueueTarget) -> QueueTarget {
    QueueTarget::new(target.queue.clone(), target.pool.clone(), target.http_framing)
}

fn framing_for(http_framing: bool) -> Box<dyn Framing + Send + Sync> {
    if http_framing { Box::new(HttpJsonFraming) } else { Box::new(NdjsonFraming) }
}

/// Polls a tailed text file for newly appended lines and feeds them into
/// `feed`, starting from end-of-file so a restart never re-delivers lines
/// written before the agent started watching. Stands in for the external
/// File Tail Watcher collaborator; a real implementation would
/// use platform filesystem-change notifications instead of polling.
fn run_tail_reader(path: PathBuf, feed: TailFeed, shutdown: Arc<AtomicBool>) {
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to open tailed file");
            return;
        }
    };
    let mut reader = BufReader::new(file);
    if reader.seek(SeekFrom::End(0)).is_err() {
        warn!(path = %path.display(), "failed to seek tailed file to end");
    }

    while !shutdown.load(Ordering::Relaxed) {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => thread::sleep(TAIL_POLL_INTERVAL),
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if !trimmed.is_empty() {
                    feed.push_line(trimmed);
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "error reading tailed file, stopping");
                break;
            }
        }
    }
}

/// Drives the single tailed-file channel (if configured) until shutdown:
/// renders each line through a [`ChannelEventSource`], delivers it through
/// a [`Subscription`] so the cursor only advances once the event has been
/// enqueued, and persists the cursor on cancel.
fn run_tail_channel(
    program_name: String,
    host: String,
    receiver: Receiver<TailLine>,
    ingestor: Arc<EventIngestor>,
    bookmarks: Arc<TomlBookmarkStore>,
    receiver_heart: Arc<Heart>,
    shutdown: Arc<AtomicBool>,
) {
    let source = ChannelEventSource::new(program_name.clone(), host);
    let mut sub = Subscription::new(program_name.clone(), source);
    sub.subscribe(bookmarks.read_bookmark(&program_name));

    while !shutdown.load(Ordering::Relaxed) {
        receiver_heart.beat();
        for line in drain_available(&receiver, StdDuration::from_millis(200)) {
            let ingestor = ingestor.clone();
            let channel = program_name.clone();
            let seq = line.seq;
            sub.deliver(&line, move |event| {
                ingestor.ingest(Some(BookmarkUpdate { channel: channel.clone(), token: seq.to_string() }), event)
            });
        }
    }

    sub.cancel(bookmarks.as_ref());
}

/// Wires every component into one running agent: buffer pools,
/// message queues, network sinks, the sender-loop thread(s), the
/// watchdog, and (for the one external collaborator this crate can
/// exercise without a real Windows Event Log) a tailed-file subscription.
///
/// A direct generalization of the original `Service::run` (see
/// `original_source/.../Agent/Service.cpp`): construct network clients,
/// start the sender thread, open subscriptions from persisted bookmarks,
/// then loop until shutdown, cancel subscriptions, and join the sender.
pub struct AgentRuntime {
    config: AgentConfig,
    bookmarks: Arc<TomlBookmarkStore>,
    ingestor: Arc<EventIngestor>,
    senders: Vec<(Arc<SinkSlot>, Arc<Heart>)>,
    watchdog: Watchdog,
    receiver_heart: Arc<Heart>,
    shutdown: Arc<AtomicBool>,
}

impl AgentRuntime {
    pub fn build(config: AgentConfig, bookmarks: TomlBookmarkStore) -> Result<Self, RuntimeError> {
        let bookmarks = Arc::new(bookmarks);
        let shutdown = Arc::new(AtomicBool::new(false));

        let primary_url = Url::parse(&config.primary.url).map_err(RuntimeError::InvalidPrimaryUrl)?;
        let primary_http = matches!(primary_url.scheme(), "http" | "https");
        let primary_sink = build_sink(&primary_url, config.primary.api_token.clone())?;
        let primary_target = build_queue_target(primary_http);
        let ingestor_primary_target = clone_target(&primary_target);
        let primary_slot =
            Arc::new(SinkSlot::new(primary_sink, primary_target, framing_for(primary_http), MAX_MSG_BYTES, MAX_BATCH, 256 * 1024));

        let shutdown_for_watchdog = shutdown.clone();
        let watchdog = Watchdog::new(WATCHDOG_TICK, WATCHDOG_FAILURE_AFTER, move |heart_name| {
            error!(heart = heart_name, "watchdog declared heart dead, requesting shutdown");
            shutdown_for_watchdog.store(true, Ordering::Relaxed);
        });

        let primary_heart = watchdog.add_heart("sender-primary");
        let mut senders = vec![(primary_slot, primary_heart)];

        let mut secondary_target_for_ingestor = None;
        if let Some(secondary_cfg) = &config.secondary {
            let secondary_url = Url::parse(&secondary_cfg.url).map_err(RuntimeError::InvalidSecondaryUrl)?;
            let secondary_http = matches!(secondary_url.scheme(), "http" | "https");
            let secondary_sink = build_sink(&secondary_url, secondary_cfg.api_token.clone())?;
            let secondary_target = build_queue_target(secondary_http);
            secondary_target_for_ingestor = Some(clone_target(&secondary_target));
            let slot = Arc::new(SinkSlot::new(
                secondary_sink,
                secondary_target,
                framing_for(secondary_http),
                MAX_MSG_BYTES,
                MAX_BATCH,
                256 * 1024,
            ));
            let heart = watchdog.add_heart("sender-secondary");
            senders.push((slot, heart));
        }

        let receiver_heart = watchdog.add_heart("receiver");
        let ingestor = Arc::new(EventIngestor::new(ingestor_primary_target, secondary_target_for_ingestor, MAX_BUFFERS_PER_MESSAGE));

        Ok(Self { config, bookmarks, ingestor, senders, watchdog, receiver_heart, shutdown })
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Spawns one OS thread per sink. Each loop's
    /// committed bookmarks are forwarded straight to the bookmark store.
    fn spawn_senders(&self) -> Vec<JoinHandle<()>> {
        self.senders
            .iter()
            .map(|(slot, heart)| {
                let bookmarks = self.bookmarks.clone();
                let loop_ = SenderLoop::new(slot.clone(), heart.clone(), self.shutdown.clone(), true)
                    .with_bookmark_sink(move |update: &BookmarkUpdate| bookmarks.write_bookmark(&update.channel, &update.token));
                thread::spawn(move || loop_.run())
            })
            .collect()
    }

    /// Spawns the tail-file reader and channel-delivery threads if a tail
    /// source is configured. Returns both join handles so `run` can wait
    /// on them during shutdown.
    fn spawn_tail(&self) -> Vec<JoinHandle<()>> {
        let Some(tail_cfg) = self.config.tail.clone() else {
            return Vec::new();
        };

        let (feed, receiver) = TailFeed::new();
        let reader_shutdown = self.shutdown.clone();
        let reader_handle = thread::spawn(move || run_tail_reader(tail_cfg.path, feed, reader_shutdown));

        let host = self.config.host_override.clone().unwrap_or_else(|| "localhost".to_string());
        let ingestor = self.ingestor.clone();
        let bookmarks = self.bookmarks.clone();
        let receiver_heart = self.receiver_heart.clone();
        let channel_shutdown = self.shutdown.clone();
        let channel_handle = thread::spawn(move || {
            run_tail_channel(tail_cfg.program_name, host, receiver, ingestor, bookmarks, receiver_heart, channel_shutdown)
        });

        vec![reader_handle, channel_handle]
    }

    /// Runs the agent until a shutdown signal arrives. Returns the exit
    /// code (0 normal, 1 fatal).
    pub fn run(self) -> i32 {
        let sender_handles = self.spawn_senders();
        let tail_handles = self.spawn_tail();
        info!(channels = self.config.channels.len(), "agent runtime started");

        if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGTERM, self.shutdown.clone()) {
            warn!(error = %err, "failed to register SIGTERM handler");
        }
        if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGINT, self.shutdown.clone()) {
            warn!(error = %err, "failed to register SIGINT handler");
        }

        let watchdog_handle: WatchdogHandle = self.watchdog.start();

        while !self.shutdown.load(Ordering::Relaxed) {
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }

        for (slot, _) in &self.senders {
            slot.target.queue.begin_shutdown();
        }
        for handle in sender_handles.into_iter().chain(tail_handles) {
            let _ = handle.join();
        }
        watchdog_handle.stop();

        info!("agent runtime stopped");
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evtforward_config::CollectorConfig;

    fn sample_config() -> AgentConfig {
        AgentConfig {
            primary: CollectorConfig { url: "https://collector.example.com/events".into(), api_token: Some("tok".into()), tls: true },
            secondary: None,
            batch_age_secs: 5,
            batch_count: 100,
            facility: 1,
            severity: evtforward_config::SeverityPolicy::Dynamic,
            host_override: Some("test-host".into()),
            poll_interval_secs: 1,
            tail: None,
            event_id_filter: Default::default(),
            channels: Default::default(),
            debug_level: 0,
            debug_log_file: None,
        }
    }

    #[test]
    fn builds_runtime_with_http_primary_sink() {
        let dir = tempfile::tempdir().unwrap();
        let bookmarks = TomlBookmarkStore::open(dir.path().join("bookmarks.toml")).unwrap();
        let runtime = AgentRuntime::build(sample_config(), bookmarks).unwrap();
        assert_eq!(runtime.senders.len(), 1);
    }

    #[test]
    fn builds_runtime_with_secondary_tcp_sink() {
        let dir = tempfile::tempdir().unwrap();
        let bookmarks = TomlBookmarkStore::open(dir.path().join("bookmarks.toml")).unwrap();
        let mut config = sample_config();
        config.secondary = Some(CollectorConfig { url: "tcp://127.0.0.1:515".into(), api_token: None, tls: false });
        let runtime = AgentRuntime::build(config, bookmarks).unwrap();
        assert_eq!(runtime.senders.len(), 2);
        assert!(runtime.ingestor.secondary.is_some());
    }

    #[test]
    fn invalid_primary_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bookmarks = TomlBookmarkStore::open(dir.path().join("bookmarks.toml")).unwrap();
        let mut config = sample_config();
        config.primary.url = "not a url".into();
        assert!(matches!(AgentRuntime::build(config, bookmarks), Err(RuntimeError::InvalidPrimaryUrl(_))));
    }
}
