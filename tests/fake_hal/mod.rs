mod concurrent;
pub mod delay;
pub mod mmio;
pub mod sched;
