use std::time::Duration;

/// Automatic attempts granted to an item before it is marked failed.
///
/// Attempts are counted from 1 on the first try.
pub const MAX_RETRIES: u32 = 3;

/// Pause between two items of the same drain pass.
pub const INTER_ITEM_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for a single transfer attempt.
///
/// Exceeding it is reported as a network failure.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Size of the chunks handed to the transport (256 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Version tag written into the persisted queue document.
pub const QUEUE_FORMAT_VERSION: u32 = 1;
