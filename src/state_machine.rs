//! The transition function at the core of the stream.
//!
//! Every externally visible event is a method on [`StateMachine`]. Each
//! method mutates the state and returns an action describing the side
//! effects the caller has to perform once it has released the lock: resume
//! the parked consumer, invoke a delegate callback, hand a result back to
//! the caller. The machine itself never locks, never calls out, and never
//! allocates outside of the buffer append path, which keeps every critical
//! section short and every transition unit-testable in isolation.

use std::collections::VecDeque;
use std::mem;

use tokio::sync::oneshot;

use crate::strategy::BackPressureStrategy;

/// The parked consumer. Sending on it wakes the consumer task with the final
/// outcome of its `next` call without running consumer code in the sender's
/// frame.
pub(crate) type Waiter<T, E> = oneshot::Sender<Result<Option<T>, E>>;

enum State<T, E, S> {
    /// Freshly constructed. Nothing buffered, nothing sent, `next` never
    /// called.
    Initial {
        strategy: S,
        iterator_initialized: bool,
    },

    /// The working state.
    ///
    /// A parked waiter implies an empty buffer; an element would have
    /// resumed it.
    Streaming {
        strategy: S,
        buffer: VecDeque<T>,
        waiter: Option<Waiter<T, E>>,
        has_outstanding_demand: bool,
        iterator_initialized: bool,
    },

    /// The producer finished; the consumer may still drain the buffer. The
    /// failure, if any, is delivered once the buffer is empty.
    SourceFinished {
        buffer: VecDeque<T>,
        iterator_initialized: bool,
        failure: Option<E>,
    },

    /// Terminal. The delegate has been released.
    Finished,

    /// Occupies `self.state` while a transition moves fields between
    /// variants. Observable only if a strategy panicked mid-transition.
    Modifying,
}

/// Outcome of a producer send, to be translated into a
/// [`SendResult`](crate::SendResult) after any waiter has been resumed.
pub(crate) enum SendAction<T, E> {
    /// Demand is open; keep producing.
    ReturnProduceMore,
    /// Demand is closed; pause until `produce_more`.
    ReturnStopProducing,
    /// Resume the waiter with `element`, then report open demand.
    ResumeWaiterAndReturnProduceMore { waiter: Waiter<T, E>, element: T },
    /// Resume the waiter with `element`, then report closed demand.
    ResumeWaiterAndReturnStopProducing { waiter: Waiter<T, E>, element: T },
    /// The stream already terminated; the elements were discarded.
    ReturnDropped,
}

pub(crate) enum FinishAction<T, E> {
    /// Resume the waiter with the failure (or end-of-stream) and invoke
    /// `did_terminate`.
    ResumeWaiterWithFailureAndCallDidTerminate {
        waiter: Waiter<T, E>,
        failure: Option<E>,
    },
    None,
}

pub(crate) enum NextAction<T, E> {
    /// Hand the element to the consumer.
    ReturnElement(T),
    /// Hand the element to the consumer and invoke `produce_more`: taking
    /// this element flipped demand open.
    ReturnElementAndCallProduceMore(T),
    /// The stream just reached its terminal state: deliver the stored
    /// failure (end-of-stream when `None`) and invoke `did_terminate`.
    ReturnFailureAndCallDidTerminate(Option<E>),
    /// Already terminated.
    ReturnNone,
    /// Nothing available; park a waiter with `attach_waiter` under the same
    /// critical section.
    Suspend,
}

pub(crate) enum AttachWaiterAction {
    /// Parking flipped demand open; invoke `produce_more`.
    CallProduceMore,
    None,
}

pub(crate) enum CancelledAction<T, E> {
    /// Resume the waiter with end-of-stream and invoke `did_terminate`.
    ResumeWaiterWithNoneAndCallDidTerminate { waiter: Waiter<T, E> },
    /// Invoke `did_terminate`.
    CallDidTerminate,
    None,
}

pub(crate) enum DeinitializedAction {
    /// Invoke `did_terminate`.
    CallDidTerminate,
    None,
}

pub(crate) struct StateMachine<T, E, S> {
    state: State<T, E, S>,
}

impl<T, E, S: BackPressureStrategy> StateMachine<T, E, S> {
    pub(crate) fn new(strategy: S) -> StateMachine<T, E, S> {
        StateMachine {
            state: State::Initial {
                strategy,
                iterator_initialized: false,
            },
        }
    }

    /// The producer deposited elements.
    pub(crate) fn send<I>(&mut self, elements: I) -> SendAction<T, E>
    where
        I: IntoIterator<Item = T>,
    {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Initial {
                mut strategy,
                iterator_initialized,
            } => {
                let buffer: VecDeque<T> = elements.into_iter().collect();
                let should_produce_more = strategy.on_send(buffer.len());
                self.state = State::Streaming {
                    strategy,
                    buffer,
                    waiter: None,
                    has_outstanding_demand: should_produce_more,
                    iterator_initialized,
                };
                if should_produce_more {
                    SendAction::ReturnProduceMore
                } else {
                    SendAction::ReturnStopProducing
                }
            }
            State::Streaming {
                mut strategy,
                mut buffer,
                waiter,
                has_outstanding_demand: _,
                iterator_initialized,
            } => {
                debug_assert!(
                    waiter.is_none() || buffer.is_empty(),
                    "waiter parked on a non-empty buffer"
                );
                buffer.extend(elements);
                match waiter {
                    Some(waiter) => match buffer.pop_front() {
                        Some(element) => {
                            let should_produce_more = strategy.on_send(buffer.len());
                            self.state = State::Streaming {
                                strategy,
                                buffer,
                                waiter: None,
                                has_outstanding_demand: should_produce_more,
                                iterator_initialized,
                            };
                            if should_produce_more {
                                SendAction::ResumeWaiterAndReturnProduceMore { waiter, element }
                            } else {
                                SendAction::ResumeWaiterAndReturnStopProducing { waiter, element }
                            }
                        }
                        // An empty send; the consumer stays parked.
                        None => {
                            let should_produce_more = strategy.on_send(0);
                            self.state = State::Streaming {
                                strategy,
                                buffer,
                                waiter: Some(waiter),
                                has_outstanding_demand: should_produce_more,
                                iterator_initialized,
                            };
                            if should_produce_more {
                                SendAction::ReturnProduceMore
                            } else {
                                SendAction::ReturnStopProducing
                            }
                        }
                    },
                    None => {
                        let should_produce_more = strategy.on_send(buffer.len());
                        self.state = State::Streaming {
                            strategy,
                            buffer,
                            waiter: None,
                            has_outstanding_demand: should_produce_more,
                            iterator_initialized,
                        };
                        if should_produce_more {
                            SendAction::ReturnProduceMore
                        } else {
                            SendAction::ReturnStopProducing
                        }
                    }
                }
            }
            state @ (State::SourceFinished { .. } | State::Finished) => {
                self.state = state;
                SendAction::ReturnDropped
            }
            State::Modifying => panic!("stream state corrupted"),
        }
    }

    /// The producer signalled the end of the stream. Idempotent.
    pub(crate) fn finish(&mut self, failure: Option<E>) -> FinishAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Initial {
                strategy: _,
                iterator_initialized,
            } => {
                self.state = State::SourceFinished {
                    buffer: VecDeque::new(),
                    iterator_initialized,
                    failure,
                };
                FinishAction::None
            }
            State::Streaming {
                waiter: Some(waiter),
                buffer,
                ..
            } => {
                debug_assert!(buffer.is_empty(), "waiter parked on a non-empty buffer");
                self.state = State::Finished;
                FinishAction::ResumeWaiterWithFailureAndCallDidTerminate { waiter, failure }
            }
            State::Streaming {
                waiter: None,
                buffer,
                iterator_initialized,
                ..
            } => {
                self.state = State::SourceFinished {
                    buffer,
                    iterator_initialized,
                    failure,
                };
                FinishAction::None
            }
            state @ (State::SourceFinished { .. } | State::Finished) => {
                self.state = state;
                FinishAction::None
            }
            State::Modifying => panic!("stream state corrupted"),
        }
    }

    /// The consumer asked for the next element.
    ///
    /// When this returns [`NextAction::Suspend`] the caller must register a
    /// waiter via [`StateMachine::attach_waiter`] before releasing the lock.
    pub(crate) fn next(&mut self) -> NextAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Initial {
                strategy,
                iterator_initialized,
            } => {
                self.state = State::Streaming {
                    strategy,
                    buffer: VecDeque::new(),
                    waiter: None,
                    has_outstanding_demand: false,
                    iterator_initialized,
                };
                NextAction::Suspend
            }
            State::Streaming {
                waiter: Some(_), ..
            } => panic!("`next` called while a previous `next` is still pending"),
            State::Streaming {
                mut strategy,
                mut buffer,
                waiter: None,
                has_outstanding_demand,
                iterator_initialized,
            } => match buffer.pop_front() {
                Some(element) => {
                    let should_produce_more = strategy.on_consume(buffer.len());
                    let demand_flipped = should_produce_more && !has_outstanding_demand;
                    self.state = State::Streaming {
                        strategy,
                        buffer,
                        waiter: None,
                        has_outstanding_demand: should_produce_more,
                        iterator_initialized,
                    };
                    if demand_flipped {
                        NextAction::ReturnElementAndCallProduceMore(element)
                    } else {
                        NextAction::ReturnElement(element)
                    }
                }
                None => {
                    self.state = State::Streaming {
                        strategy,
                        buffer,
                        waiter: None,
                        has_outstanding_demand,
                        iterator_initialized,
                    };
                    NextAction::Suspend
                }
            },
            State::SourceFinished {
                mut buffer,
                iterator_initialized,
                failure,
            } => match buffer.pop_front() {
                // The producer is done; no demand signalling on the drain.
                Some(element) => {
                    self.state = State::SourceFinished {
                        buffer,
                        iterator_initialized,
                        failure,
                    };
                    NextAction::ReturnElement(element)
                }
                None => {
                    self.state = State::Finished;
                    NextAction::ReturnFailureAndCallDidTerminate(failure)
                }
            },
            State::Finished => {
                self.state = State::Finished;
                NextAction::ReturnNone
            }
            State::Modifying => panic!("stream state corrupted"),
        }
    }

    /// Parks the consumer. Must only follow a [`NextAction::Suspend`] within
    /// the same critical section.
    pub(crate) fn attach_waiter(&mut self, waiter: Waiter<T, E>) -> AttachWaiterAction {
        match &mut self.state {
            State::Streaming {
                strategy,
                buffer,
                waiter: slot,
                has_outstanding_demand,
                ..
            } if slot.is_none() => {
                debug_assert!(buffer.is_empty(), "parking on a non-empty buffer");
                *slot = Some(waiter);
                let should_produce_more = strategy.on_consume(0);
                let demand_flipped = should_produce_more && !*has_outstanding_demand;
                *has_outstanding_demand = should_produce_more;
                if demand_flipped {
                    AttachWaiterAction::CallProduceMore
                } else {
                    AttachWaiterAction::None
                }
            }
            _ => panic!("waiter registered outside of a suspending `next`"),
        }
    }

    /// The consumer's pending `next` was cancelled.
    pub(crate) fn cancelled(&mut self) -> CancelledAction<T, E> {
        match mem::replace(&mut self.state, State::Modifying) {
            State::Initial { .. } => {
                self.state = State::Finished;
                CancelledAction::CallDidTerminate
            }
            State::Streaming {
                waiter: Some(waiter),
                ..
            } => {
                self.state = State::Finished;
                CancelledAction::ResumeWaiterWithNoneAndCallDidTerminate { waiter }
            }
            State::Streaming { waiter: None, .. } => {
                self.state = State::Finished;
                CancelledAction::CallDidTerminate
            }
            state @ (State::SourceFinished { .. } | State::Finished) => {
                self.state = state;
                CancelledAction::None
            }
            State::Modifying => panic!("stream state corrupted"),
        }
    }

    /// The consumer-side stream handle was dropped.
    pub(crate) fn sequence_deinitialized(&mut self) -> DeinitializedAction {
        let iterator_initialized = match &self.state {
            State::Initial {
                iterator_initialized,
                ..
            }
            | State::Streaming {
                iterator_initialized,
                ..
            }
            | State::SourceFinished {
                iterator_initialized,
                ..
            } => *iterator_initialized,
            State::Finished => return DeinitializedAction::None,
            State::Modifying => panic!("stream state corrupted"),
        };

        if iterator_initialized {
            // The iterator now owns termination.
            DeinitializedAction::None
        } else {
            self.state = State::Finished;
            DeinitializedAction::CallDidTerminate
        }
    }

    /// An iterator was created from the stream handle.
    pub(crate) fn iterator_initialized(&mut self) {
        match &mut self.state {
            State::Initial {
                iterator_initialized,
                ..
            }
            | State::Streaming {
                iterator_initialized,
                ..
            }
            | State::SourceFinished {
                iterator_initialized,
                ..
            } => {
                assert!(
                    !*iterator_initialized,
                    "only one iterator may be created per stream"
                );
                *iterator_initialized = true;
            }
            // Late creation after termination; `next` will return `None`.
            State::Finished => {}
            State::Modifying => panic!("stream state corrupted"),
        }
    }

    /// The iterator was dropped.
    pub(crate) fn iterator_deinitialized(&mut self) -> DeinitializedAction {
        let iterator_initialized = match &self.state {
            State::Initial {
                iterator_initialized,
                ..
            }
            | State::Streaming {
                iterator_initialized,
                ..
            }
            | State::SourceFinished {
                iterator_initialized,
                ..
            } => *iterator_initialized,
            State::Finished => return DeinitializedAction::None,
            State::Modifying => panic!("stream state corrupted"),
        };

        assert!(
            iterator_initialized,
            "iterator deinitialized before it was created"
        );
        self.state = State::Finished;
        DeinitializedAction::CallDidTerminate
    }
}
