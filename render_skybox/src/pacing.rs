//! Frame pacing: a counting semaphore bounds the frames in flight and a
//! completion channel reports retired submissions back to the producer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};

/// Depth of the in-flight frame pipeline.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Completed,
    /// The device reported an error between this frame's submission and
    /// its completion callback.
    DeviceError,
}

/// Completion event for one retired frame slot.
#[derive(Clone, Copy, Debug)]
pub struct FrameCompletion {
    pub slot: usize,
    pub status: FrameStatus,
}

struct SlotGate {
    available: Mutex<usize>,
    retired: Condvar,
}

impl SlotGate {
    fn new() -> Self {
        Self {
            available: Mutex::new(MAX_FRAMES_IN_FLIGHT),
            retired: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut available = self.available.lock().expect("frame gate lock poisoned");
        while *available == 0 {
            available = self
                .retired
                .wait(available)
                .expect("frame gate lock poisoned");
        }
        *available -= 1;
    }

    fn release(&self) {
        let mut available = self.available.lock().expect("frame gate lock poisoned");
        *available = (*available + 1).min(MAX_FRAMES_IN_FLIGHT);
        self.retired.notify_one();
    }

    fn release_all(&self) {
        let mut available = self.available.lock().expect("frame gate lock poisoned");
        *available = MAX_FRAMES_IN_FLIGHT;
        self.retired.notify_all();
    }

    fn available(&self) -> usize {
        *self.available.lock().expect("frame gate lock poisoned")
    }
}

/// Coordinates the 3-deep frame pipeline. The producer thread acquires a
/// slot before writing that slot's uniforms; the GPU completion callback
/// (which runs on a runtime-owned thread) releases it. The semaphore is
/// the only state shared across that boundary.
pub struct FramePacer {
    gate: Arc<SlotGate>,
    device_errored: Arc<AtomicBool>,
    completions_tx: mpsc::Sender<FrameCompletion>,
    completions_rx: mpsc::Receiver<FrameCompletion>,
    next_slot: usize,
}

impl FramePacer {
    pub fn new() -> Self {
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            gate: Arc::new(SlotGate::new()),
            device_errored: Arc::new(AtomicBool::new(false)),
            completions_tx,
            completions_rx,
            next_slot: 0,
        }
    }

    /// Blocks until fewer than [`MAX_FRAMES_IN_FLIGHT`] frames are
    /// outstanding, then hands out the next round-robin slot index. A
    /// slot index is never reissued before its completion fires.
    pub fn acquire_slot(&mut self) -> usize {
        self.gate.acquire();
        let slot = self.next_slot;
        self.next_slot = (self.next_slot + 1) % MAX_FRAMES_IN_FLIGHT;
        slot
    }

    pub fn in_flight(&self) -> usize {
        MAX_FRAMES_IN_FLIGHT - self.gate.available()
    }

    /// Flag flipped by the device's uncaptured-error hook; the next
    /// completion reports `DeviceError` and the frame counts as dropped.
    pub fn error_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.device_errored)
    }

    /// Callback to register with the queue once the frame is submitted.
    /// Safe to invoke from any thread.
    pub fn completion_handler(&self, slot: usize) -> impl FnOnce() + Send + 'static {
        let gate = Arc::clone(&self.gate);
        let errored = Arc::clone(&self.device_errored);
        let tx = self.completions_tx.clone();
        move || {
            let status = if errored.swap(false, Ordering::AcqRel) {
                FrameStatus::DeviceError
            } else {
                FrameStatus::Completed
            };
            let _ = tx.send(FrameCompletion { slot, status });
            gate.release();
        }
    }

    /// Completion events retired since the last drain.
    pub fn drain_completions(&mut self) -> Vec<FrameCompletion> {
        self.completions_rx.try_iter().collect()
    }

    /// Opens every slot so no waiter deadlocks during teardown.
    /// Outstanding GPU work is left to drain on its own.
    pub fn release_all(&self) {
        self.gate.release_all();
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::{Duration, Instant};

    fn wait_for(counter: &AtomicUsize, value: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::Acquire) != value {
            assert!(Instant::now() < deadline, "timed out waiting for {}", value);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn slots_round_robin_over_three() {
        let mut pacer = FramePacer::new();
        let first = pacer.acquire_slot();
        let second = pacer.acquire_slot();
        let third = pacer.acquire_slot();
        assert_eq!((first, second, third), (0, 1, 2));
        assert_eq!(pacer.in_flight(), 3);
        pacer.completion_handler(first)();
        assert_eq!(pacer.acquire_slot(), 0);
    }

    #[test]
    fn producer_blocks_at_three_in_flight() {
        let mut pacer = FramePacer::new();
        let acquired = Arc::new(AtomicUsize::new(0));
        let handlers: Vec<_> = (0..3)
            .map(|_| {
                let slot = pacer.acquire_slot();
                acquired.fetch_add(1, Ordering::AcqRel);
                pacer.completion_handler(slot)
            })
            .collect();

        let acquired_thread = Arc::clone(&acquired);
        let producer = thread::spawn(move || {
            let fourth = pacer.acquire_slot();
            acquired_thread.fetch_add(1, Ordering::AcqRel);
            fourth
        });

        // The fourth acquire must not get through while three frames are
        // outstanding.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(acquired.load(Ordering::Acquire), 3);

        let mut handlers = handlers.into_iter();
        handlers.next().expect("handler")();
        wait_for(&acquired, 4);
        assert_eq!(producer.join().expect("producer"), 0);
    }

    #[test]
    fn completions_carry_slot_and_status() {
        let mut pacer = FramePacer::new();
        let slot_a = pacer.acquire_slot();
        let slot_b = pacer.acquire_slot();
        let handler_a = pacer.completion_handler(slot_a);
        let handler_b = pacer.completion_handler(slot_b);
        pacer.error_flag().store(true, Ordering::Release);
        handler_a();
        handler_b();
        let completions = pacer.drain_completions();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].slot, slot_a);
        assert_eq!(completions[0].status, FrameStatus::DeviceError);
        assert_eq!(completions[1].slot, slot_b);
        assert_eq!(completions[1].status, FrameStatus::Completed);
    }

    #[test]
    fn release_all_unblocks_a_waiting_producer() {
        let mut pacer = FramePacer::new();
        for _ in 0..3 {
            pacer.acquire_slot();
        }
        let gate = Arc::clone(&pacer.gate);
        let unblocked = Arc::new(AtomicUsize::new(0));
        let unblocked_thread = Arc::clone(&unblocked);
        let waiter = thread::spawn(move || {
            gate.acquire();
            unblocked_thread.fetch_add(1, Ordering::AcqRel);
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(unblocked.load(Ordering::Acquire), 0);
        pacer.release_all();
        waiter.join().expect("waiter");
        assert_eq!(unblocked.load(Ordering::Acquire), 1);
    }

    #[test]
    fn stressed_producer_never_exceeds_the_bound() {
        let mut pacer = FramePacer::new();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let slot = pacer.acquire_slot();
            let now = outstanding.fetch_add(1, Ordering::AcqRel) + 1;
            peak.fetch_max(now, Ordering::AcqRel);
            let handler = pacer.completion_handler(slot);
            let outstanding_worker = Arc::clone(&outstanding);
            thread::spawn(move || {
                thread::sleep(Duration::from_micros(200));
                outstanding_worker.fetch_sub(1, Ordering::AcqRel);
                handler();
            });
        }
        assert!(peak.load(Ordering::Acquire) <= MAX_FRAMES_IN_FLIGHT);
    }
}
