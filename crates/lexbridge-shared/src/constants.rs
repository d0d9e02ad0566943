/// Application name
pub const APP_NAME: &str = "LexBridge";

/// Messages a user may send per rate-limit window
pub const MESSAGE_RATE_CAPACITY: u32 = 30;

/// Message rate-limit window in seconds
pub const MESSAGE_RATE_WINDOW_SECS: u64 = 60;

/// Maximum length of a text message, in characters
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Timeout applied to every persistence call, in milliseconds
pub const STORE_TIMEOUT_MS: u64 = 5_000;

/// Re-read/modify/write attempts after a version conflict before giving up
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// Outbound events buffered per live session before new ones are dropped
pub const SESSION_QUEUE_DEPTH: usize = 256;

/// Prefix of every user's personal notification room
pub const PERSONAL_ROOM_PREFIX: &str = "user_";

/// Prefix of channel ids tied to a direct connection
pub const DIRECT_CHANNEL_PREFIX: &str = "direct";

/// Default and maximum page size for message history
pub const HISTORY_PAGE_SIZE: u32 = 50;
pub const HISTORY_PAGE_MAX: u32 = 200;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
