use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// ULIDs carry 128 bits (48-bit timestamp + 80 random bits), so collisions
/// are not a practical concern and the ids are safe to use as registry keys.
///
/// # Examples
/// ```
/// let id = courier_common::id::prefixed_ulid("sub");
/// assert!(id.starts_with("sub_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// A subscriber's WebSocket session.
    pub const SUBSCRIBER: &str = "sub";
}
