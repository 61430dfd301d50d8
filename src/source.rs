use std::fmt;
use std::sync::Arc;

use crate::delegate::Delegate;
use crate::storage::Storage;
use crate::strategy::BackPressureStrategy;

/// Outcome of a [`Source::send`] or [`Source::send_all`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "discarding a SendResult loses the back-pressure signal"]
pub enum SendResult {
    /// The elements were buffered and demand is open; keep producing.
    ProduceMore,
    /// The elements were buffered but demand is closed; pause until the
    /// delegate's `produce_more` fires.
    StopProducing,
    /// The stream already terminated; the elements were discarded.
    Dropped,
}

/// The producer half of the stream.
///
/// A `Source` deposits elements with [`send`](Source::send) /
/// [`send_all`](Source::send_all) and ends the stream with
/// [`finish`](Source::finish) or
/// [`finish_with_failure`](Source::finish_with_failure). All operations are
/// synchronous and non-blocking, so they can be called from a network
/// pipeline callback or any other thread that must not wait.
///
/// Dropping the `Source` finishes the stream as if [`finish`](Source::finish)
/// had been called: the consumer drains whatever is buffered and then sees
/// end-of-stream.
pub struct Source<T, E, S: BackPressureStrategy, D: Delegate> {
    storage: Arc<Storage<T, E, S, D>>,
}

impl<T, E, S: BackPressureStrategy, D: Delegate> Source<T, E, S, D> {
    pub(crate) fn new(storage: Arc<Storage<T, E, S, D>>) -> Source<T, E, S, D> {
        Source { storage }
    }

    /// Deposits a single element.
    ///
    /// If the consumer is parked, it is resumed with the element; otherwise
    /// the element is buffered. The result carries the current demand: a
    /// producer that keeps sending after [`SendResult::StopProducing`] is not
    /// an error, but it grows the buffer without bound.
    pub fn send(&self, element: T) -> SendResult {
        self.storage.send(std::iter::once(element))
    }

    /// Deposits every element of `elements`, preserving its order.
    pub fn send_all<I>(&self, elements: I) -> SendResult
    where
        I: IntoIterator<Item = T>,
    {
        self.storage.send(elements)
    }

    /// Ends the stream.
    ///
    /// Buffered elements are still delivered; once they are drained the
    /// consumer sees end-of-stream. Calling `finish` more than once is a
    /// no-op, as is finishing after the stream already terminated.
    pub fn finish(&self) {
        self.storage.finish(None);
    }

    /// Ends the stream with a failure.
    ///
    /// Buffered elements are still delivered; once they are drained the
    /// consumer's `next` resolves to `Err(failure)`, exactly once. A parked
    /// consumer receives the failure immediately.
    pub fn finish_with_failure(&self, failure: E) {
        self.storage.finish(Some(failure));
    }
}

impl<T, E, S: BackPressureStrategy, D: Delegate> Drop for Source<T, E, S, D> {
    fn drop(&mut self) {
        // Idempotent; a stream that was finished explicitly is unaffected.
        self.storage.finish(None);
    }
}

impl<T, E, S: BackPressureStrategy, D: Delegate> fmt::Debug for Source<T, E, S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source").finish_non_exhaustive()
    }
}
