//! RAII resource guards for automatic cleanup.
//!
//! - [`UniverseLockGuard`] - releases a universe update lock on every exit path

mod lock_guard;

pub use lock_guard::UniverseLockGuard;
