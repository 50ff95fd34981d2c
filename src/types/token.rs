/// A cancellation token used to stop bulk deletions at chunk granularity.
///
/// This is a type alias for [`tokio_util::sync::CancellationToken`]. Pass the
/// token to a client constructor and call
/// [`cancel()`](tokio_util::sync::CancellationToken::cancel) on it to stop
/// dispatching further chunks and listing pages. Chunks already dispatched
/// run to completion.
pub type DeletionCancellationToken = tokio_util::sync::CancellationToken;

/// Create a new [`DeletionCancellationToken`].
///
/// # Example
///
/// ```
/// use objrecycle_rs::create_deletion_cancellation_token;
///
/// let token = create_deletion_cancellation_token();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn create_deletion_cancellation_token() -> DeletionCancellationToken {
    tokio_util::sync::CancellationToken::new()
}
