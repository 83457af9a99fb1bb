//! Filename sanitization and storage key derivation.
//!
//! Keys have the shape `<prefix><epoch-millis>-<sanitized-name>`.  The
//! millisecond component comes from a process-wide monotonic clock, so
//! two keys minted by one process never collide even for identical names
//! uploaded within the same millisecond.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name used when the upload carries no filename.
pub const UNKNOWN_FILENAME: &str = "unknown";

/// Prefix the resize job puts in front of the original key.
pub const COMPRESSED_PREFIX: &str = "resized_";

/// Replace every character outside `[A-Za-z0-9.]` with `_`.
///
/// Works per Unicode scalar value, so `é` becomes a single `_`.
/// Applying it twice yields the same result as applying it once.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Strictly increasing millisecond clock.
///
/// Returns the wall-clock time in milliseconds, or one more than the last
/// value handed out when the wall clock has not moved on (or went back).
#[derive(Debug, Default)]
pub struct KeyClock {
    last: AtomicU64,
}

impl KeyClock {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Next timestamp given the current wall-clock reading `now_ms`.
    pub fn next_after(&self, now_ms: u64) -> u64 {
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let next = now_ms.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Next timestamp using the system clock.
    pub fn tick(&self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.next_after(now_ms)
    }
}

static KEY_CLOCK: KeyClock = KeyClock::new();

/// Build a storage key from its parts.
pub fn storage_key(prefix: &str, millis: u64, sanitized_name: &str) -> String {
    format!("{prefix}{millis}-{sanitized_name}")
}

/// Mint a fresh storage key for an already-sanitized filename.
pub fn next_storage_key(prefix: &str, sanitized_name: &str) -> String {
    storage_key(prefix, KEY_CLOCK.tick(), sanitized_name)
}

/// Size in mebibytes with two decimals, e.g. `"0.00"` or `"2.50"`.
pub fn format_size_mb(size_bytes: u64) -> String {
    format!("{:.2}", size_bytes as f64 / (1024.0 * 1024.0))
}

/// Split `key` into (root, extension) the way the resize job does:
/// the extension is the last dot-suffix of the final path segment,
/// ignoring leading dots of that segment.
fn split_extension(key: &str) -> (&str, &str) {
    let base_start = key.rfind('/').map_or(0, |i| i + 1);
    let base = &key[base_start..];
    let leading_dots = base.len() - base.trim_start_matches('.').len();
    match base.rfind('.') {
        Some(dot) if dot > leading_dots => key.split_at(base_start + dot),
        _ => (key, ""),
    }
}

/// Key under which the resize job stores the compressed copy of `key`.
///
/// PNG, WebP and GIF keep their format and extension; JPEGs keep `.jpg`
/// or `.jpeg`; everything else is re-encoded as JPEG and gets `.jpg`.
pub fn compressed_variant_key(key: &str) -> String {
    let (root, ext) = split_extension(key);
    let ext = ext.to_ascii_lowercase();
    let ext = match ext.as_str() {
        ".png" | ".webp" | ".gif" | ".jpg" | ".jpeg" => ext.as_str(),
        _ => ".jpg",
    };
    format!("{COMPRESSED_PREFIX}{root}{ext}")
}
