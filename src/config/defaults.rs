//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

use std::net::SocketAddr;

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

// =============================================================================
// Session Defaults
// =============================================================================

pub fn default_max_sessions() -> usize {
    50
}

pub fn default_cleanup_interval_minutes() -> u64 {
    15
}

pub fn default_timeout_minutes() -> u64 {
    60
}

pub fn default_close_timeout_secs() -> u64 {
    10
}

pub fn default_connect_timeout_secs() -> u64 {
    120
}

// =============================================================================
// Message Defaults
// =============================================================================

pub fn default_delay_ms() -> u64 {
    8000
}

pub fn default_max_retries() -> u32 {
    3
}

pub fn default_attempt_timeout_secs() -> u64 {
    30
}

pub fn default_max_recipients() -> usize {
    1000
}

// =============================================================================
// Upload Defaults
// =============================================================================

pub fn default_max_file_size() -> usize {
    10 * 1024 * 1024
}

pub fn default_allowed_mime_types() -> Vec<String> {
    [
        "image/jpeg",
        "image/png",
        "image/gif",
        "video/mp4",
        "audio/mp3",
        "application/pdf",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

// =============================================================================
// Client / Logging Defaults
// =============================================================================

pub fn default_auto_pair_secs() -> u64 {
    5
}

pub fn default_log_level() -> String {
    "info".to_string()
}
