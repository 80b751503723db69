//! Shared HTTP constants (headers, problem URIs, streaming sizes).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";
pub(crate) const SSE_KEEP_ALIVE_SECS: u64 = 20;
pub(crate) const CONTENT_TYPE_PROBLEM: &str = "application/problem+json";
pub(crate) const CONTENT_TYPE_FALLBACK: &str = "application/octet-stream";

/// Upper bound on one body chunk read from disk.
pub(crate) const STREAM_CHUNK_BYTES: u64 = 64 * 1024;

pub(crate) const PROBLEM_INTERNAL: &str = "https://reel.dev/problems/internal";
pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://reel.dev/problems/bad-request";
pub(crate) const PROBLEM_FORBIDDEN: &str = "https://reel.dev/problems/forbidden";
pub(crate) const PROBLEM_NOT_FOUND: &str = "https://reel.dev/problems/not-found";
pub(crate) const PROBLEM_CONFLICT: &str = "https://reel.dev/problems/conflict";
pub(crate) const PROBLEM_NO_PLAYABLE_FILE: &str = "https://reel.dev/problems/no-playable-file";
pub(crate) const PROBLEM_RANGE: &str = "https://reel.dev/problems/range-not-satisfiable";
pub(crate) const PROBLEM_INSUFFICIENT_STORAGE: &str =
    "https://reel.dev/problems/insufficient-storage";
pub(crate) const PROBLEM_TIMEOUT: &str = "https://reel.dev/problems/adapter-timeout";
