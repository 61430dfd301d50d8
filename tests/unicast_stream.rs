#![warn(rust_2018_idioms)]

use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Condvar, Mutex};

use tokio_test::task::spawn;
use tokio_test::{assert_pending, assert_ready};
use tokio_unicast::{BackPressureStrategy, Delegate, HighLowWatermark, SendResult};

#[derive(Default)]
struct TestDelegate {
    produce_more: AtomicUsize,
    did_terminate: AtomicUsize,
}

impl TestDelegate {
    fn produce_more_calls(&self) -> usize {
        self.produce_more.load(SeqCst)
    }

    fn did_terminate_calls(&self) -> usize {
        self.did_terminate.load(SeqCst)
    }
}

impl Delegate for TestDelegate {
    fn produce_more(&self) {
        self.produce_more.fetch_add(1, SeqCst);
    }

    fn did_terminate(&self) {
        self.did_terminate.fetch_add(1, SeqCst);
    }
}

struct AlwaysProduce;

impl BackPressureStrategy for AlwaysProduce {
    fn on_send(&mut self, _: usize) -> bool {
        true
    }

    fn on_consume(&mut self, _: usize) -> bool {
        true
    }
}

#[test]
fn single_element_single_await() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());
    let mut iter = stream.into_async_iter();

    {
        let mut next = spawn(iter.next());
        assert_pending!(next.poll());
        // Parking is a consume event; it opened demand.
        assert_eq!(delegate.produce_more_calls(), 1);

        assert_eq!(source.send(1), SendResult::ProduceMore);
        assert!(next.is_woken());
        assert_eq!(assert_ready!(next.poll()), Ok(Some(1)));
    }

    source.finish();
    assert_eq!(delegate.did_terminate_calls(), 0);

    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(None));
    }
    assert_eq!(delegate.did_terminate_calls(), 1);
}

#[test]
fn demand_reopens_on_the_drain_edge() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<&str, &str, _, _>(HighLowWatermark::new(2, 2), delegate.clone());
    let mut iter = stream.into_async_iter();

    assert_eq!(source.send_all(["a", "b", "c"]), SendResult::StopProducing);

    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some("a")));
    }
    // Depth 2: still at the low watermark.
    assert_eq!(delegate.produce_more_calls(), 0);

    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some("b")));
    }
    // Depth 1: demand reopened, exactly once.
    assert_eq!(delegate.produce_more_calls(), 1);

    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some("c")));
    }
    assert_eq!(delegate.produce_more_calls(), 1);

    {
        let mut next = spawn(iter.next());
        assert_pending!(next.poll());
        assert_eq!(delegate.produce_more_calls(), 1);

        source.finish();
        assert!(next.is_woken());
        assert_eq!(assert_ready!(next.poll()), Ok(None));
    }
    assert_eq!(delegate.did_terminate_calls(), 1);
}

#[test]
fn failure_is_delivered_after_the_buffer_drains() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());
    let mut iter = stream.into_async_iter();

    assert_eq!(source.send_all([1, 2]), SendResult::ProduceMore);
    source.finish_with_failure("boom");
    assert_eq!(delegate.did_terminate_calls(), 0);

    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some(1)));
    }
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some(2)));
    }
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Err("boom"));
    }
    assert_eq!(delegate.did_terminate_calls(), 1);

    // The failure is delivered exactly once.
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(None));
    }
    assert_eq!(delegate.did_terminate_calls(), 1);
}

#[test]
fn cancelling_a_parked_next_terminates_the_stream() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());
    let mut iter = stream.into_async_iter();

    {
        let mut next = spawn(iter.next());
        assert_pending!(next.poll());
        drop(next);
    }
    assert_eq!(delegate.did_terminate_calls(), 1);
    assert_eq!(source.send(1), SendResult::Dropped);

    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(None));
    }
}

#[test]
fn cancellation_losing_the_race_keeps_the_finish_outcome() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());
    let mut iter = stream.into_async_iter();

    let mut next = spawn(iter.next());
    assert_pending!(next.poll());

    // The finish reaches the stream first and resumes the waiter; dropping
    // the future afterwards must not terminate a second time.
    source.finish_with_failure("boom");
    assert_eq!(delegate.did_terminate_calls(), 1);
    drop(next);
    assert_eq!(delegate.did_terminate_calls(), 1);

    let mut next = spawn(iter.next());
    assert_eq!(assert_ready!(next.poll()), Ok(None));
}

#[test]
fn dropping_the_iterator_terminates_the_stream() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());

    assert_eq!(source.send(1), SendResult::ProduceMore);

    let iter = stream.into_async_iter();
    drop(iter);

    assert_eq!(delegate.did_terminate_calls(), 1);
    assert_eq!(source.send(2), SendResult::Dropped);
}

#[test]
fn dropping_the_stream_without_an_iterator_terminates() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());

    drop(stream);

    assert_eq!(delegate.did_terminate_calls(), 1);
    assert_eq!(source.send(1), SendResult::Dropped);
}

#[test]
fn dropping_the_source_finishes_the_stream() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());
    let mut iter = stream.into_async_iter();

    assert_eq!(source.send_all([1, 2]), SendResult::ProduceMore);
    drop(source);

    // The buffer still drains before end-of-stream.
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some(1)));
    }
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some(2)));
    }
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(None));
    }
    assert_eq!(delegate.did_terminate_calls(), 1);
}

#[test]
fn dropping_the_source_resumes_a_parked_consumer() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());
    let mut iter = stream.into_async_iter();

    let mut next = spawn(iter.next());
    assert_pending!(next.poll());

    drop(source);
    assert!(next.is_woken());
    assert_eq!(assert_ready!(next.poll()), Ok(None));
    assert_eq!(delegate.did_terminate_calls(), 1);
}

#[test]
fn empty_send_keeps_the_consumer_parked() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());
    let mut iter = stream.into_async_iter();

    let mut next = spawn(iter.next());
    assert_pending!(next.poll());

    assert_eq!(
        source.send_all(std::iter::empty::<u32>()),
        SendResult::ProduceMore
    );
    assert_pending!(next.poll());

    assert_eq!(source.send(5), SendResult::ProduceMore);
    assert!(next.is_woken());
    assert_eq!(assert_ready!(next.poll()), Ok(Some(5)));
}

#[test]
fn late_iterator_after_termination_sees_end_of_stream() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());

    source.finish();
    let mut iter = stream.into_async_iter();

    let mut next = spawn(iter.next());
    assert_eq!(assert_ready!(next.poll()), Ok(None));
    assert_eq!(delegate.did_terminate_calls(), 1);
}

struct Recording {
    calls: Arc<Mutex<Vec<(&'static str, usize)>>>,
}

impl BackPressureStrategy for Recording {
    fn on_send(&mut self, buffer_depth: usize) -> bool {
        self.calls.lock().unwrap().push(("send", buffer_depth));
        true
    }

    fn on_consume(&mut self, buffer_depth: usize) -> bool {
        self.calls.lock().unwrap().push(("consume", buffer_depth));
        true
    }
}

#[test]
fn strategy_sees_every_depth_change_once() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) = tokio_unicast::channel::<u32, &str, _, _>(
        Recording {
            calls: calls.clone(),
        },
        delegate,
    );
    let mut iter = stream.into_async_iter();

    // Post-append depth.
    assert_eq!(source.send_all([1, 2]), SendResult::ProduceMore);

    // Post-pop depths.
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some(1)));
    }
    {
        let mut next = spawn(iter.next());
        assert_eq!(assert_ready!(next.poll()), Ok(Some(2)));
    }

    {
        let mut next = spawn(iter.next());
        // Parking consults the strategy with a depth of zero.
        assert_pending!(next.poll());
        // The resumed element never touches the buffer: the send sees the
        // depth after the hand-off.
        assert_eq!(source.send(3), SendResult::ProduceMore);
        assert_eq!(assert_ready!(next.poll()), Ok(Some(3)));
    }

    assert_eq!(
        *calls.lock().unwrap(),
        [
            ("send", 2),
            ("consume", 1),
            ("consume", 0),
            ("consume", 0),
            ("send", 0),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn elements_arrive_in_send_order() {
    let delegate = Arc::new(TestDelegate::default());
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(AlwaysProduce, delegate.clone());

    let producer = std::thread::spawn(move || {
        let elements: Vec<u32> = (0..100).collect();
        for chunk in elements.chunks(7) {
            let result = source.send_all(chunk.iter().copied());
            assert_ne!(result, SendResult::Dropped);
        }
        source.finish();
    });

    let consumer = tokio::spawn(async move {
        let mut iter = stream.into_async_iter();
        let mut received = Vec::new();
        while let Some(n) = iter.next().await.unwrap() {
            received.push(n);
        }
        received
    });

    producer.join().unwrap();
    assert_eq!(consumer.await.unwrap(), (0..100).collect::<Vec<u32>>());
    assert_eq!(delegate.did_terminate_calls(), 1);
}

/// Opens a gate for the producer whenever demand reopens.
struct GateDelegate {
    gate: Arc<(Mutex<bool>, Condvar)>,
    did_terminate: AtomicUsize,
}

impl Delegate for GateDelegate {
    fn produce_more(&self) {
        let (open, cvar) = &*self.gate;
        *open.lock().unwrap() = true;
        cvar.notify_one();
    }

    fn did_terminate(&self) {
        self.did_terminate.fetch_add(1, SeqCst);
        // Release a producer that is parked on closed demand.
        self.produce_more();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watermarks_throttle_a_fast_producer() {
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let delegate = Arc::new(GateDelegate {
        gate: gate.clone(),
        did_terminate: AtomicUsize::new(0),
    });
    let (source, stream) =
        tokio_unicast::channel::<u32, &str, _, _>(HighLowWatermark::new(2, 4), delegate.clone());

    // A producer that honors the back-pressure protocol: pause on
    // `StopProducing`, resume when the delegate reopens the gate.
    let producer = std::thread::spawn(move || {
        for n in 0..50 {
            match source.send(n) {
                SendResult::ProduceMore => {}
                SendResult::StopProducing => {
                    let (open, cvar) = &*gate;
                    let mut open = open.lock().unwrap();
                    while !*open {
                        open = cvar.wait(open).unwrap();
                    }
                    *open = false;
                }
                SendResult::Dropped => panic!("stream terminated under the producer"),
            }
        }
        source.finish();
    });

    let mut iter = stream.into_async_iter();
    let mut received = Vec::new();
    while let Some(n) = iter.next().await.unwrap() {
        received.push(n);
    }

    producer.join().unwrap();
    assert_eq!(received, (0..50).collect::<Vec<u32>>());
    assert_eq!(delegate.did_terminate.load(SeqCst), 1);
}

fn assert_send<T: Send>() {}
fn assert_sync<T: Sync>() {}

#[test]
fn handles_are_send() {
    assert_send::<tokio_unicast::Source<u32, &'static str, AlwaysProduce, TestDelegate>>();
    assert_sync::<tokio_unicast::Source<u32, &'static str, AlwaysProduce, TestDelegate>>();
    assert_send::<tokio_unicast::UnicastStream<u32, &'static str, AlwaysProduce, TestDelegate>>();
    assert_send::<tokio_unicast::AsyncIter<u32, &'static str, AlwaysProduce, TestDelegate>>();
}
