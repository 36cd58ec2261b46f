pub mod channel_tail;
mod record;
mod severity;
mod subscription;

pub use channel_tail::{ChannelEventSource, TailFeed, TailLine, drain_available};
pub use record::{RenderedEvent, SizingPolicy, build_record};
pub use severity::Severity;
pub use subscription::{BookmarkStore, PlatformEventSource, Subscription, SubscriptionState};
