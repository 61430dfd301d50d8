//! The producer-side callback object.

use std::sync::Arc;

/// Receives demand and termination signals on behalf of the producer.
///
/// The stream invokes the delegate outside of its internal lock, on whichever
/// thread triggered the transition. That may be the producer's thread (e.g.
/// while tearing the stream down) or the consumer's task, so implementations
/// must be prepared for either.
///
/// Both callbacks must return quickly and must not call back into the stream
/// they belong to; doing so can deadlock.
pub trait Delegate {
    /// The consumer caught up and the producer should resume producing.
    ///
    /// This is edge-triggered: it fires when demand flips from "stop" to
    /// "produce more" as a consequence of the consumer taking elements, and
    /// not again until demand has dropped in between. Results returned from
    /// [`Source::send`] already carry the demand state for the producer's own
    /// sends.
    ///
    /// [`Source::send`]: crate::Source::send
    fn produce_more(&self);

    /// The stream reached its terminal state and no further elements will be
    /// consumed.
    ///
    /// Fires exactly once per stream, after which the stream drops its
    /// reference to the delegate.
    fn did_terminate(&self);
}

impl<D: Delegate + ?Sized> Delegate for Arc<D> {
    fn produce_more(&self) {
        (**self).produce_more()
    }

    fn did_terminate(&self) {
        (**self).did_terminate()
    }
}

impl<D: Delegate + ?Sized> Delegate for Box<D> {
    fn produce_more(&self) {
        (**self).produce_more()
    }

    fn did_terminate(&self) {
        (**self).did_terminate()
    }
}

impl<D: Delegate> Delegate for &'static D {
    fn produce_more(&self) {
        (**self).produce_more()
    }

    fn did_terminate(&self) {
        (**self).did_terminate()
    }
}
