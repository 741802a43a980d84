use mmio_dht11::sched;
use std::io;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, PartialEq)]
pub struct State {
    pub elevated: bool,
    pub elevations: u32,
    pub restorations: u32,
}

/// Records priority changes instead of making them.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    state: Arc<Mutex<State>>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler::default()
    }

    pub fn state(&self) -> Arc<Mutex<State>> {
        self.state.clone()
    }
}

impl sched::Scheduler for Scheduler {
    fn set_max_priority(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.elevated = true;
        state.elevations += 1;
        Ok(())
    }

    fn set_default_priority(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.elevated = false;
        state.restorations += 1;
        Ok(())
    }
}
