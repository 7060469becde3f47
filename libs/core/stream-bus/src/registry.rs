//! Stream configuration (type-safe constants)
//!
//! Implement `StreamDef` to define a stream's Redis keys and settings in
//! one place; producers and consumers derive their configuration from it.

/// Stream configuration (type-safe constants)
///
/// # Example
///
/// ```ignore
/// struct CollectRequestStream;
///
/// impl StreamDef for CollectRequestStream {
///     const STREAM_NAME: &'static str = "harvest:requests";
///     const CONSUMER_GROUP: &'static str = "collectors";
/// }
/// ```
pub trait StreamDef {
    /// The Redis stream name (e.g., "harvest:requests")
    const STREAM_NAME: &'static str;

    /// The consumer group name (e.g., "collectors")
    const CONSUMER_GROUP: &'static str;

    /// Maximum stream length before trimming (default: 100,000)
    const MAX_LENGTH: i64 = 100_000;

    /// Blocking read timeout in milliseconds (default: 5000)
    const BLOCK_TIMEOUT_MS: u64 = 5_000;
}
