#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! A unicast, back-pressured bridge from a synchronous producer to an
//! asynchronous consumer.
//!
//! [`channel`] couples a producer that must never block — a network pipeline
//! callback, a decoder running on an I/O thread — to a single task that
//! awaits elements one at a time:
//!
//! * [`Source`] is the producer handle. [`Source::send`] deposits elements
//!   without blocking and reports, per call, whether the producer should keep
//!   going or pause.
//! * [`UnicastStream`] is handed to the consumer task and converted, exactly
//!   once, into an [`AsyncIter`] whose [`next`](AsyncIter::next) yields the
//!   elements in send order.
//! * A [`BackPressureStrategy`] watches the buffer depth and decides when to
//!   pause the producer; [`HighLowWatermark`] is the stock policy.
//! * A [`Delegate`] carries the consumer-driven signals back to the producer:
//!   `produce_more` when demand reopens, `did_terminate` exactly once when
//!   the stream is torn down.
//!
//! The stream is strictly unicast: one consumer, one iterator, elements
//! delivered in order with no fan-out and no reordering. Termination —
//! whether by [`Source::finish`], a failure, cancellation, or a dropped
//! handle — always releases a parked consumer and always notifies the
//! delegate exactly once.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use tokio_unicast::{Delegate, HighLowWatermark, SendResult};
//!
//! // Tracks the producer-side signals; a real delegate would resume or
//! // pause reads on a socket.
//! #[derive(Default)]
//! struct ReadSignals {
//!     resumed: AtomicUsize,
//! }
//!
//! impl Delegate for ReadSignals {
//!     fn produce_more(&self) {
//!         self.resumed.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn did_terminate(&self) {}
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let signals = Arc::new(ReadSignals::default());
//! let (source, stream) = tokio_unicast::channel::<u32, Infallible, _, _>(
//!     HighLowWatermark::new(2, 4),
//!     signals.clone(),
//! );
//!
//! // The producer is any synchronous thread.
//! let producer = std::thread::spawn(move || {
//!     for n in 0..3 {
//!         if source.send(n) == SendResult::Dropped {
//!             return;
//!         }
//!     }
//!     source.finish();
//! });
//!
//! // The consumer drains the stream one element at a time.
//! let mut iter = stream.into_async_iter();
//! let mut received = Vec::new();
//! while let Some(n) = iter.next().await.unwrap() {
//!     received.push(n);
//! }
//!
//! producer.join().unwrap();
//! assert_eq!(received, [0, 1, 2]);
//! # }
//! ```
//!
//! # Back-pressure
//!
//! Demand is a single boolean edge. Every [`Source::send`] returns the
//! current regime ([`SendResult::ProduceMore`] or
//! [`SendResult::StopProducing`]); once a producer has been told to stop,
//! the reopening edge arrives exactly once, via the delegate's
//! `produce_more`, on the consumer event that drained the buffer far enough.
//! The delegate is never invoked as a consequence of a send.
//!
//! # Termination
//!
//! All roads lead to the same terminal state:
//!
//! * [`Source::finish`] — the consumer drains the buffer, then sees
//!   end-of-stream.
//! * [`Source::finish_with_failure`] — the consumer drains the buffer, then
//!   gets the failure, once.
//! * Dropping the [`UnicastStream`] before creating an iterator, or dropping
//!   the [`AsyncIter`] — the stream terminates immediately.
//! * Dropping a suspended [`AsyncIter::next`] future (task cancellation) —
//!   the stream terminates immediately.
//!
//! After any of these, `did_terminate` has fired exactly once and every
//! subsequent send returns [`SendResult::Dropped`].

mod delegate;
mod iter;
mod source;
mod state_machine;
mod storage;
mod strategy;
mod stream;

pub use self::delegate::Delegate;
pub use self::iter::{AsyncIter, InfallibleAsyncIter};
pub use self::source::{SendResult, Source};
pub use self::strategy::{BackPressureStrategy, HighLowWatermark};
pub use self::stream::{InfallibleUnicastStream, UnicastStream};

use std::convert::Infallible;
use std::sync::Arc;

use self::storage::Storage;

/// Creates a new unicast stream, returning the producer and consumer halves.
///
/// The producer keeps the [`Source`]; the [`UnicastStream`] is moved to the
/// consumer task and converted into its iterator there. `E` is the failure
/// type delivered by [`Source::finish_with_failure`]; use
/// [`infallible_channel`] when the stream cannot fail.
///
/// # Examples
///
/// ```
/// use std::io;
///
/// use tokio_unicast::HighLowWatermark;
///
/// struct NoopDelegate;
///
/// impl tokio_unicast::Delegate for NoopDelegate {
///     fn produce_more(&self) {}
///     fn did_terminate(&self) {}
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (source, stream) =
///     tokio_unicast::channel::<Vec<u8>, io::Error, _, _>(HighLowWatermark::new(4, 16), NoopDelegate);
///
/// let _ = source.send(b"frame".to_vec());
/// source.finish_with_failure(io::Error::from(io::ErrorKind::ConnectionReset));
///
/// let mut iter = stream.into_async_iter();
/// assert_eq!(iter.next().await.unwrap(), Some(b"frame".to_vec()));
/// assert_eq!(
///     iter.next().await.unwrap_err().kind(),
///     io::ErrorKind::ConnectionReset
/// );
/// # }
/// ```
pub fn channel<T, E, S, D>(strategy: S, delegate: D) -> (Source<T, E, S, D>, UnicastStream<T, E, S, D>)
where
    S: BackPressureStrategy,
    D: Delegate,
{
    let storage = Arc::new(Storage::new(strategy, delegate));
    let source = Source::new(storage.clone());
    let stream = UnicastStream::new(storage);
    (source, stream)
}

/// Creates a new unicast stream that cannot fail.
///
/// Identical to [`channel`] with the failure type fixed to [`Infallible`]:
/// the iterator's `next` resolves straight to `Option<T>`, and the source
/// has no way to finish with a failure.
pub fn infallible_channel<T, S, D>(
    strategy: S,
    delegate: D,
) -> (Source<T, Infallible, S, D>, InfallibleUnicastStream<T, S, D>)
where
    S: BackPressureStrategy,
    D: Delegate,
{
    let (source, stream) = channel(strategy, delegate);
    (source, InfallibleUnicastStream::new(stream))
}
