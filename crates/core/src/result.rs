//! Result type definition and extension traits.
//!
//! Provides combinators for Result types so call sites can log and move on
//! without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for sidecar controller operations.
///
/// # Examples
///
/// ```ignore
/// fn lookup(cache: &dyn PodCache, key: &PodKey) -> Result<bool> {
///     let snapshot = cache.get_by_key(key)?;
///     Ok(snapshot.is_some())
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing logging combinators for any `Result` whose error
/// is displayable.
pub trait ResultExt<T, E> {
    /// Convert a Result to an Option, logging the error (with context) if present.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T, E> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "{context}");
                None
            }
        }
    }
}
