//! Transfer progress reporting.

/// Receives one notification per acknowledged block.
///
/// Closures `FnMut(usize, usize)` taking `(blocks_done, total_blocks)`
/// implement this, so most callers never name the trait.
pub trait ProgressSink {
    /// Block `done` of `total` was acknowledged by the device.
    fn block_acknowledged(&mut self, done: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: FnMut(usize, usize),
{
    fn block_acknowledged(&mut self, done: usize, total: usize) {
        self(done, total);
    }
}

/// Sink that ignores all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn block_acknowledged(&mut self, _done: usize, _total: usize) {}
}
