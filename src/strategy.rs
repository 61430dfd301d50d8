//! Back-pressure strategies.

/// Decides whether the producer should keep producing, based on the number of
/// buffered elements.
///
/// The stream consults the strategy from inside its critical section: once
/// after every append with the post-append depth, and once after every pop
/// (or when the consumer parks on an empty buffer, with a depth of `0`).
/// Returning `true` means the producer should be in the "produce more"
/// regime, `false` means it should pause.
///
/// Implementations must be quick and self-contained. In particular they must
/// not call back into the stream that invoked them; the stream's lock is held
/// for the duration of the call.
pub trait BackPressureStrategy {
    /// Called after the producer appended elements to the buffer.
    ///
    /// `buffer_depth` is the number of elements buffered after the append
    /// (and after any element handed directly to a parked consumer).
    fn on_send(&mut self, buffer_depth: usize) -> bool;

    /// Called after the consumer popped an element, with the post-pop depth,
    /// or with `0` when the consumer parks on an empty buffer.
    fn on_consume(&mut self, buffer_depth: usize) -> bool;
}

/// A back-pressure strategy with a high and a low watermark.
///
/// The producer is told to pause once the buffer reaches `high` elements and
/// is asked to resume once the consumer has drained it below `low`.
///
/// # Examples
///
/// ```
/// use tokio_unicast::{BackPressureStrategy, HighLowWatermark};
///
/// let mut strategy = HighLowWatermark::new(2, 4);
///
/// // Producer filled the buffer up to the high watermark: pause.
/// assert!(!strategy.on_send(4));
///
/// // One element consumed; still at or above the low watermark.
/// assert!(!strategy.on_consume(3));
/// assert!(!strategy.on_consume(2));
///
/// // Drained below the low watermark: resume.
/// assert!(strategy.on_consume(1));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HighLowWatermark {
    low: usize,
    high: usize,
}

impl HighLowWatermark {
    /// Creates a strategy with the given low and high watermarks.
    ///
    /// # Panics
    ///
    /// Panics if `low > high`.
    pub fn new(low: usize, high: usize) -> HighLowWatermark {
        assert!(
            low <= high,
            "low watermark ({}) must not exceed high watermark ({})",
            low,
            high
        );
        HighLowWatermark { low, high }
    }
}

impl BackPressureStrategy for HighLowWatermark {
    fn on_send(&mut self, buffer_depth: usize) -> bool {
        buffer_depth < self.high
    }

    fn on_consume(&mut self, buffer_depth: usize) -> bool {
        buffer_depth < self.low
    }
}
