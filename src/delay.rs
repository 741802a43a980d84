use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;

/// Yields the thread to the OS. Cheap on CPU, but may overshoot by a scheduler tick
/// or more.
#[derive(Clone, Copy, Debug, Default)]
pub struct SleepDelay;

impl DelayNs for SleepDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms.into()));
    }
}

/// Spins on the monotonic clock until the delay has passed. Burns a core, but does not
/// overshoot.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpinDelay;

impl SpinDelay {
    fn spin(duration: Duration) {
        let end = Instant::now() + duration;
        while Instant::now() < end {
            core::hint::spin_loop();
        }
    }
}

impl DelayNs for SpinDelay {
    fn delay_ns(&mut self, ns: u32) {
        SpinDelay::spin(Duration::from_nanos(ns.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        SpinDelay::spin(Duration::from_millis(ms.into()));
    }
}
