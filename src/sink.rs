use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use parking_lot::Mutex;

/// Unbounded collection point for the latency samples of one phase.
///
/// Workers push through the channel sender, which never blocks. The receiver is only
/// touched by [`LatencySink::drain`], after every worker of the phase has finished.
pub struct LatencySink {
    sender: Sender<Duration>,
    receiver: Mutex<Receiver<Duration>>,
}

impl LatencySink {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        LatencySink {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    pub fn record(&self, sample: Duration) {
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.sender.send(sample);
    }

    /// Removes and returns every sample recorded so far, in arrival order.
    pub fn drain(&self) -> Vec<Duration> {
        self.receiver.lock().try_iter().collect()
    }
}

impl Default for LatencySink {
    fn default() -> Self {
        Self::new()
    }
}
