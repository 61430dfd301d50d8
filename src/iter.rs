use std::cell::Cell;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::delegate::Delegate;
use crate::storage::{NextOutcome, Storage};
use crate::strategy::BackPressureStrategy;

/// Produces the stream's elements, one `next().await` at a time.
///
/// Created by [`UnicastStream::into_async_iter`]. The iterator belongs to a
/// single consumer task: it is not `Sync`, not `Clone`, and `next` takes
/// `&mut self`, so two overlapping `next` calls cannot be expressed.
///
/// Dropping the iterator terminates the stream: the delegate's
/// `did_terminate` fires and subsequent sends return
/// [`SendResult::Dropped`](crate::SendResult::Dropped). Buffered elements
/// that were never asked for are discarded.
///
/// [`UnicastStream::into_async_iter`]: crate::UnicastStream::into_async_iter
pub struct AsyncIter<T, E, S: BackPressureStrategy, D: Delegate> {
    storage: Arc<Storage<T, E, S, D>>,
    /// Pins the iterator to one consumer at a time.
    _not_sync: PhantomData<Cell<()>>,
}

impl<T, E, S: BackPressureStrategy, D: Delegate> AsyncIter<T, E, S, D> {
    pub(crate) fn new(storage: Arc<Storage<T, E, S, D>>) -> AsyncIter<T, E, S, D> {
        storage.iterator_initialized();
        AsyncIter {
            storage,
            _not_sync: PhantomData,
        }
    }

    /// Resolves to the next element.
    ///
    /// Returns `Ok(Some(element))` for each element in send order,
    /// `Ok(None)` after the producer finished and the buffer drained (and on
    /// every call after that), or `Err(failure)` exactly once if the
    /// producer finished with a failure. If nothing is buffered and the
    /// producer is still live, the call suspends until the producer sends or
    /// finishes.
    ///
    /// # Cancel safety
    ///
    /// `next` is *not* cancel-safe. Dropping the returned future while it is
    /// suspended — for example from a losing [`tokio::select!`] branch —
    /// terminates the stream: the consumer's side of the contract is that it
    /// either takes the next element or walks away for good. If the drop
    /// races a concurrent `finish`, whichever reaches the stream first
    /// decides; elements already handed to the waiter are lost either way.
    ///
    /// [`tokio::select!`]: https://docs.rs/tokio/1/tokio/macro.select.html
    pub async fn next(&mut self) -> Result<Option<T>, E> {
        let rx = match self.storage.next() {
            NextOutcome::Ready(result) => return result,
            NextOutcome::Suspend(rx) => rx,
        };

        let mut guard = CancelGuard {
            storage: &*self.storage,
            armed: true,
        };
        let result = rx.await;
        guard.armed = false;

        match result {
            Ok(result) => result,
            // The waiter was torn down without being resumed; the stream is
            // gone.
            Err(_) => Ok(None),
        }
    }
}

impl<T, E, S: BackPressureStrategy, D: Delegate> Drop for AsyncIter<T, E, S, D> {
    fn drop(&mut self) {
        self.storage.iterator_deinitialized();
    }
}

impl<T, E, S: BackPressureStrategy, D: Delegate> fmt::Debug for AsyncIter<T, E, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncIter").finish_non_exhaustive()
    }
}

/// Fires the cancellation event if the enclosing `next` future is dropped
/// between parking and resumption.
struct CancelGuard<'a, T, E, S: BackPressureStrategy, D: Delegate> {
    storage: &'a Storage<T, E, S, D>,
    armed: bool,
}

impl<T, E, S: BackPressureStrategy, D: Delegate> Drop for CancelGuard<'_, T, E, S, D> {
    fn drop(&mut self) {
        if self.armed {
            self.storage.cancelled();
        }
    }
}

/// Produces the elements of a stream that cannot fail.
///
/// Created by [`InfallibleUnicastStream::into_async_iter`]. Identical to
/// [`AsyncIter`] except that [`next`](InfallibleAsyncIter::next) resolves to
/// a bare `Option<T>`.
///
/// [`InfallibleUnicastStream::into_async_iter`]:
///     crate::InfallibleUnicastStream::into_async_iter
pub struct InfallibleAsyncIter<T, S: BackPressureStrategy, D: Delegate> {
    inner: AsyncIter<T, Infallible, S, D>,
}

impl<T, S: BackPressureStrategy, D: Delegate> InfallibleAsyncIter<T, S, D> {
    pub(crate) fn new(inner: AsyncIter<T, Infallible, S, D>) -> InfallibleAsyncIter<T, S, D> {
        InfallibleAsyncIter { inner }
    }

    /// Resolves to the next element, or `None` once the stream ends.
    ///
    /// # Cancel safety
    ///
    /// Not cancel-safe; see [`AsyncIter::next`].
    pub async fn next(&mut self) -> Option<T> {
        match self.inner.next().await {
            Ok(element) => element,
            Err(never) => match never {},
        }
    }
}

impl<T, S: BackPressureStrategy, D: Delegate> fmt::Debug for InfallibleAsyncIter<T, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfallibleAsyncIter").finish_non_exhaustive()
    }
}
