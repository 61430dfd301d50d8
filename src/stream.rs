use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use crate::delegate::Delegate;
use crate::iter::{AsyncIter, InfallibleAsyncIter};
use crate::storage::Storage;
use crate::strategy::BackPressureStrategy;

/// The consumer half of the stream, as handed out by [`channel`].
///
/// A `UnicastStream` is an opaque handle meant to be moved to the consumer
/// task, where [`into_async_iter`](UnicastStream::into_async_iter) turns it
/// into the [`AsyncIter`] that actually produces elements. The stream admits
/// exactly one iterator over its lifetime; the conversion consumes the
/// handle, so a second live iterator cannot be expressed.
///
/// Dropping the handle without creating an iterator terminates the stream:
/// the delegate's `did_terminate` fires and subsequent sends return
/// [`SendResult::Dropped`](crate::SendResult::Dropped).
///
/// [`channel`]: crate::channel
pub struct UnicastStream<T, E, S: BackPressureStrategy, D: Delegate> {
    storage: Arc<Storage<T, E, S, D>>,
}

impl<T, E, S: BackPressureStrategy, D: Delegate> UnicastStream<T, E, S, D> {
    pub(crate) fn new(storage: Arc<Storage<T, E, S, D>>) -> UnicastStream<T, E, S, D> {
        UnicastStream { storage }
    }

    /// Converts the stream into its iterator.
    pub fn into_async_iter(self) -> AsyncIter<T, E, S, D> {
        // Registers the iterator before `self` drops, so the drop below is a
        // recorded hand-over rather than a termination.
        AsyncIter::new(self.storage.clone())
    }
}

impl<T, E, S: BackPressureStrategy, D: Delegate> Drop for UnicastStream<T, E, S, D> {
    fn drop(&mut self) {
        self.storage.sequence_deinitialized();
    }
}

impl<T, E, S: BackPressureStrategy, D: Delegate> fmt::Debug for UnicastStream<T, E, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnicastStream").finish_non_exhaustive()
    }
}

/// The consumer half of a stream that cannot fail, as handed out by
/// [`infallible_channel`].
///
/// A thin wrapper over [`UnicastStream`] with the failure type fixed to
/// [`Infallible`], so that [`InfallibleAsyncIter::next`] resolves straight to
/// `Option<T>`.
///
/// [`infallible_channel`]: crate::infallible_channel
pub struct InfallibleUnicastStream<T, S: BackPressureStrategy, D: Delegate> {
    inner: UnicastStream<T, Infallible, S, D>,
}

impl<T, S: BackPressureStrategy, D: Delegate> InfallibleUnicastStream<T, S, D> {
    pub(crate) fn new(
        inner: UnicastStream<T, Infallible, S, D>,
    ) -> InfallibleUnicastStream<T, S, D> {
        InfallibleUnicastStream { inner }
    }

    /// Converts the stream into its iterator.
    pub fn into_async_iter(self) -> InfallibleAsyncIter<T, S, D> {
        InfallibleAsyncIter::new(self.inner.into_async_iter())
    }
}

impl<T, S: BackPressureStrategy, D: Delegate> fmt::Debug for InfallibleUnicastStream<T, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfallibleUnicastStream").finish_non_exhaustive()
    }
}
