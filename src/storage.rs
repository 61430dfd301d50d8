//! Shared state behind the `Source`, `UnicastStream`, and `AsyncIter`
//! handles.
//!
//! Every event funnels through here: take the lock, let the state machine
//! compute an action, drop the lock, then perform the action's side effects.
//! Side effects always run in the same order: resume the waiter first, then
//! invoke the delegate. The delegate is captured while the lock is still
//! held so the callback matches the state the transition observed, even if
//! another event slips in after the lock is released.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::delegate::Delegate;
use crate::state_machine::{
    AttachWaiterAction, CancelledAction, DeinitializedAction, FinishAction, NextAction,
    SendAction, StateMachine,
};
use crate::strategy::BackPressureStrategy;
use crate::SendResult;

pub(crate) struct Storage<T, E, S: BackPressureStrategy, D: Delegate> {
    inner: Mutex<Inner<T, E, S, D>>,
}

struct Inner<T, E, S: BackPressureStrategy, D: Delegate> {
    state_machine: StateMachine<T, E, S>,

    /// Dropped at the terminal transition, after its final `did_terminate`.
    delegate: Option<Arc<D>>,
}

/// What `Storage::next` resolved to while the lock was held.
pub(crate) enum NextOutcome<T, E> {
    /// The outcome is already known.
    Ready(Result<Option<T>, E>),
    /// A waiter was parked; await the receiver.
    Suspend(oneshot::Receiver<Result<Option<T>, E>>),
}

impl<T, E, S: BackPressureStrategy, D: Delegate> Storage<T, E, S, D> {
    pub(crate) fn new(strategy: S, delegate: D) -> Storage<T, E, S, D> {
        Storage {
            inner: Mutex::new(Inner {
                state_machine: StateMachine::new(strategy),
                delegate: Some(Arc::new(delegate)),
            }),
        }
    }

    pub(crate) fn send<I>(&self, elements: I) -> SendResult
    where
        I: IntoIterator<Item = T>,
    {
        let mut inner = self.inner.lock();
        let action = inner.state_machine.send(elements);
        drop(inner);

        match action {
            SendAction::ReturnProduceMore => SendResult::ProduceMore,
            SendAction::ReturnStopProducing => SendResult::StopProducing,
            SendAction::ResumeWaiterAndReturnProduceMore { waiter, element } => {
                let _ = waiter.send(Ok(Some(element)));
                SendResult::ProduceMore
            }
            SendAction::ResumeWaiterAndReturnStopProducing { waiter, element } => {
                let _ = waiter.send(Ok(Some(element)));
                SendResult::StopProducing
            }
            SendAction::ReturnDropped => SendResult::Dropped,
        }
    }

    pub(crate) fn finish(&self, failure: Option<E>) {
        let mut inner = self.inner.lock();
        match inner.state_machine.finish(failure) {
            FinishAction::ResumeWaiterWithFailureAndCallDidTerminate { waiter, failure } => {
                let delegate = inner.delegate.take();
                drop(inner);

                let _ = waiter.send(match failure {
                    Some(failure) => Err(failure),
                    None => Ok(None),
                });
                if let Some(delegate) = delegate {
                    delegate.did_terminate();
                }
            }
            FinishAction::None => {}
        }
    }

    pub(crate) fn next(&self) -> NextOutcome<T, E> {
        let mut inner = self.inner.lock();
        match inner.state_machine.next() {
            NextAction::ReturnElement(element) => NextOutcome::Ready(Ok(Some(element))),
            NextAction::ReturnElementAndCallProduceMore(element) => {
                let delegate = inner.delegate.clone();
                drop(inner);

                if let Some(delegate) = delegate {
                    delegate.produce_more();
                }
                NextOutcome::Ready(Ok(Some(element)))
            }
            NextAction::ReturnFailureAndCallDidTerminate(failure) => {
                let delegate = inner.delegate.take();
                drop(inner);

                if let Some(delegate) = delegate {
                    delegate.did_terminate();
                }
                NextOutcome::Ready(match failure {
                    Some(failure) => Err(failure),
                    None => Ok(None),
                })
            }
            NextAction::ReturnNone => NextOutcome::Ready(Ok(None)),
            NextAction::Suspend => {
                // Registered under the same lock acquisition, so no event can
                // observe the half-parked consumer.
                let (tx, rx) = oneshot::channel();
                let action = inner.state_machine.attach_waiter(tx);
                let delegate = match action {
                    AttachWaiterAction::CallProduceMore => inner.delegate.clone(),
                    AttachWaiterAction::None => None,
                };
                drop(inner);

                if let Some(delegate) = delegate {
                    delegate.produce_more();
                }
                NextOutcome::Suspend(rx)
            }
        }
    }

    /// A pending `next` was dropped before it resolved.
    pub(crate) fn cancelled(&self) {
        let mut inner = self.inner.lock();
        match inner.state_machine.cancelled() {
            CancelledAction::ResumeWaiterWithNoneAndCallDidTerminate { waiter } => {
                let delegate = inner.delegate.take();
                drop(inner);

                let _ = waiter.send(Ok(None));
                if let Some(delegate) = delegate {
                    delegate.did_terminate();
                }
            }
            CancelledAction::CallDidTerminate => {
                let delegate = inner.delegate.take();
                drop(inner);

                if let Some(delegate) = delegate {
                    delegate.did_terminate();
                }
            }
            CancelledAction::None => {}
        }
    }

    pub(crate) fn sequence_deinitialized(&self) {
        let mut inner = self.inner.lock();
        match inner.state_machine.sequence_deinitialized() {
            DeinitializedAction::CallDidTerminate => {
                let delegate = inner.delegate.take();
                drop(inner);

                if let Some(delegate) = delegate {
                    delegate.did_terminate();
                }
            }
            DeinitializedAction::None => {}
        }
    }

    pub(crate) fn iterator_initialized(&self) {
        self.inner.lock().state_machine.iterator_initialized();
    }

    pub(crate) fn iterator_deinitialized(&self) {
        let mut inner = self.inner.lock();
        match inner.state_machine.iterator_deinitialized() {
            DeinitializedAction::CallDidTerminate => {
                let delegate = inner.delegate.take();
                drop(inner);

                if let Some(delegate) = delegate {
                    delegate.did_terminate();
                }
            }
            DeinitializedAction::None => {}
        }
    }
}
