//! FreeSWITCH Event Socket Layer (ESL) transport for TalkTime
//!
//! Receives channel events from one or more switches, maps them onto
//! [`CallEvent`](talktime_core::models::CallEvent)s for the call engine, and
//! carries the engine's commands back as background API calls.
//!
//! # Architecture
//!
//! ```text
//! FreeSWITCH ESL Server
//!         |
//!         v
//!  EslConnection (Framed<TcpStream, EslCodec>)
//!         |
//!         v
//!   EslEvent -> mapping -> CallEvent
//!         |
//!         v
//!  CallEventHandler (call engine)
//!         |
//!         v
//!  EslCallControl -> bgapi uuid_kill / uuid_transfer / voice changer
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod control;
pub mod event;
pub mod mapping;

#[cfg(test)]
mod testing;

pub use client::EslClient;
pub use codec::{EslCodec, EslCodecError};
pub use connection::EslConnection;
pub use control::EslCallControl;
pub use event::EslEvent;

/// ESL protocol constants
pub mod constants {
    /// Default ESL password (FreeSWITCH default)
    pub const DEFAULT_PASSWORD: &str = "ClueCon";

    pub const AUTH_COMMAND: &str = "auth";

    pub const EVENT_COMMAND: &str = "event";

    /// Background API command prefix
    pub const BGAPI_COMMAND: &str = "bgapi";

    pub const CONTENT_TYPE_REPLY: &str = "command/reply";

    pub const CONTENT_TYPE_EVENT: &str = "text/event-plain";

    pub const CONTENT_TYPE_AUTH: &str = "auth/request";

    pub const CONTENT_TYPE_DISCONNECT: &str = "text/disconnect-notice";

    /// Upper bound on one frame, headers plus body
    pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

    /// Handshake reply timeout in seconds
    pub const COMMAND_TIMEOUT_SECS: u64 = 10;

    /// Epoch headers at or above this value are milliseconds
    pub const EPOCH_MILLIS_THRESHOLD: i64 = 10_000_000_000;

    /// Fallback layout of `*_stamp` headers (UTC)
    pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub const DEFAULT_SOURCE_ADDRESS: &str = "127.0.0.1";
}

/// ESL events we subscribe to
pub mod events {
    /// Call waiting for an admission decision
    pub const CHANNEL_PARK: &str = "CHANNEL_PARK";

    pub const CHANNEL_UNPARK: &str = "CHANNEL_UNPARK";

    /// Channel bridge (two channels connected)
    pub const CHANNEL_BRIDGE: &str = "CHANNEL_BRIDGE";

    /// Channel answered (call connected)
    pub const CHANNEL_ANSWER: &str = "CHANNEL_ANSWER";

    /// Channel hangup complete (call ended)
    pub const CHANNEL_HANGUP_COMPLETE: &str = "CHANNEL_HANGUP_COMPLETE";

    pub const SUBSCRIBED_EVENTS: &[&str] = &[
        CHANNEL_PARK,
        CHANNEL_UNPARK,
        CHANNEL_BRIDGE,
        CHANNEL_ANSWER,
        CHANNEL_HANGUP_COMPLETE,
    ];
}
