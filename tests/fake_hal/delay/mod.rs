use embedded_hal::delay::DelayNs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Returns immediately, keeping a tally of the time it was asked to wait.
#[derive(Clone, Debug, Default)]
pub struct Delay {
    total_ns: Arc<AtomicU64>,
}

impl Delay {
    pub fn new() -> Delay {
        Delay::default()
    }

    pub fn total_ns(&self) -> u64 {
        self.total_ns.load(Ordering::SeqCst)
    }
}

impl DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns.fetch_add(ns.into(), Ordering::SeqCst);
    }
}
