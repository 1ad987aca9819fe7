/// Application name
pub const APP_NAME: &str = "Courier";

/// Number of failed delivery attempts after which an outbox entry is given up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff base delay in milliseconds (first retry waits this long)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 2_000;

/// Upper bound on the backoff delay in milliseconds (5 minutes)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Interval between timer-driven sync passes in seconds
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Upper bound on delta pages followed per cursor in a single pass
pub const DEFAULT_MAX_PAGES_PER_PASS: u32 = 20;

/// Connectivity heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;

/// Maximum characters kept in a conversation's last-message preview
pub const SUMMARY_PREVIEW_CHARS: usize = 120;

/// Cursor key for the conversations list delta
pub const CURSOR_CONVERSATIONS: &str = "conversations";

/// Cursor key for the users delta
pub const CURSOR_USERS: &str = "users";
