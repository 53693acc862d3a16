//! Environment abstraction for deterministic testing.
//!
//! Decouples the synchronization core from system resources. Production
//! drivers plug in the real clock and OS entropy; tests use a virtual
//! clock and a seeded RNG so every scenario replays exactly.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
/// Implementations MUST guarantee:
/// - `now()` never goes backwards
/// - `random_bytes()` draws from a cryptographically secure source in
///   production (seeds become private keys and IVs)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`; test environments
    /// use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time as Unix milliseconds.
    ///
    /// Message timestamps use this. Unlike [`now`](Self::now), it may jump
    /// when the system clock is adjusted.
    fn unix_millis(&self) -> u64;

    /// Fill the buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Sleep for the specified duration.
    ///
    /// The only async method in the trait; it exists for driver code
    /// (reconnect backoff), never for the coordinator itself.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
