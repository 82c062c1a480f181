//! Application state shared across all request handlers.

use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding the delay between streamed frames.
const CHUNK_DELAY_ENV: &str = "CONVERSE_STUB_DELAY_MS";

/// Default delay between streamed frames.
const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(40);

/// Marker that makes the stub fail mid-stream.
pub const FAIL_MARKER: &str = "!fail";

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Pause inserted before each frame.
    pub chunk_delay: Duration,
}

impl AppState {
    /// Create a new application state from the environment.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let chunk_delay = std::env::var(CHUNK_DELAY_ENV)
            .ok()
            .and_then(|ms| ms.parse::<u64>().ok())
            .map_or(DEFAULT_CHUNK_DELAY, Duration::from_millis);

        Arc::new(Self { chunk_delay })
    }

    /// Create a state that streams without pauses.
    #[must_use]
    pub fn immediate() -> Arc<Self> {
        Arc::new(Self {
            chunk_delay: Duration::ZERO,
        })
    }
}
