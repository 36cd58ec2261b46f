use tracing::{info, warn};

use crate::record::RenderedEvent;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Active,
    Cancelled,
}

/// Abstraction over whatever platform API actually produces events —
/// Windows Event Log subscriptions, a tailed file, or (in tests) an
/// in-memory channel. The subscription state machine only needs to create
/// and advance an opaque cursor and render events through it.
pub trait PlatformEventSource {
    type Cursor: Clone;
    type Event;

    /// Opens a cursor positioned after `token`, or at the oldest available
    /// event if `token` is `None` or rejected by the platform.
    fn create_cursor(&self, token: Option<&str>) -> Self::Cursor;

    /// Serializes a cursor to the opaque string persisted as a bookmark.
    fn render_cursor(&self, cursor: &Self::Cursor) -> String;

    /// Advances `cursor` past `event`. Returns `false` on failure, in
    /// which case the cursor is left unchanged.
    fn advance_cursor(&self, cursor: &mut Self::Cursor, event: &Self::Event) -> bool;

    fn render_event(&self, event: &Self::Event) -> RenderedEvent;
}

/// Where to persist and retrieve the per-channel bookmark token.
pub trait BookmarkStore {
    fn read_bookmark(&self, channel: &str) -> Option<String>;
    fn write_bookmark(&self, channel: &str, token: &str);
}

/// Idle -> Active -> Cancelled state machine driving one platform channel.
///
/// The cursor only advances after the handler (the event-record builder
/// plus its enqueue) reports success, so a crash between delivery and
/// enqueue re-delivers the event on restart rather than silently skipping
/// it.
pub struct Subscription<S: PlatformEventSource> {
    channel: String,
    source: S,
    state: SubscriptionState,
    cursor: Option<S::Cursor>,
}

impl<S: PlatformEventSource> Subscription<S> {
    pub fn new(channel: impl Into<String>, source: S) -> Self {
        Self { channel: channel.into(), source, state: SubscriptionState::Idle, cursor: None }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Opens the subscription, resuming after `persisted_token` if one was
    /// read back from the bookmark store, otherwise from the oldest event.
    pub fn subscribe(&mut self, persisted_token: Option<String>) {
        self.cursor = Some(self.source.create_cursor(persisted_token.as_deref()));
        self.state = SubscriptionState::Active;
    }

    /// Delivers one event to `handler`. Advances the cursor only if
    /// `handler` reports success.
    pub fn deliver(&mut self, event: &S::Event, mut handler: impl FnMut(&RenderedEvent) -> bool) {
        debug_assert_eq!(self.state, SubscriptionState::Active);
        let rendered = self.source.render_event(event);
        if !handler(&rendered) {
            warn!(channel = %self.channel, "handler rejected event, cursor not advanced");
            return;
        }
        let Some(cursor) = self.cursor.as_mut() else {
            warn!(channel = %self.channel, "delivery with no open cursor");
            return;
        };
        if !self.source.advance_cursor(cursor, event) {
            warn!(channel = %self.channel, "cursor advance failed, next successful event covers the gap");
        }
    }

    /// Logs a platform-reported delivery error (stale query, etc.) without
    /// touching the cursor.
    pub fn deliver_error(&mut self, message: &str) {
        warn!(channel = %self.channel, message, "platform reported a delivery error");
    }

    /// Moves to `Cancelled` and persists the current cursor, if any, to
    /// `bookmarks`.
    pub fn cancel(&mut self, bookmarks: &dyn BookmarkStore) {
        if let Some(cursor) = &self.cursor {
            let token = self.source.render_cursor(cursor);
            bookmarks.write_bookmark(&self.channel, &token);
            info!(channel = %self.channel, "persisted bookmark on cancel");
        }
        self.state = SubscriptionState::Cancelled;
    }
}
