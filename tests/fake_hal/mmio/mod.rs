use super::concurrent;
use mmio_dht11::mmio::{self, MmioError};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const PIN_LEVEL: usize = 13;

/// Every register write, in order, as `(word index, value)`.
pub type WriteLog = Arc<Mutex<Vec<(usize, u32)>>>;

/// A GPIO register block whose level register replays a recorded line.
///
/// Each read of the pin's level consumes one entry of `data_to_read`. Once the
/// recording runs out the line sits at `default_level`.
#[derive(Debug)]
pub struct Registers {
    words: [u32; 16],
    name: &'static str,
    pin: u8,
    data_to_read: Option<Arc<Vec<u8>>>,
    default_level: bool,
    writes: WriteLog,
}

impl mmio::Registers for Registers {
    fn read(&self, index: usize) -> u32 {
        if index != PIN_LEVEL + (self.pin / 32) as usize {
            return self.words[index];
        }
        let high = match self.data_to_read {
            None => self.default_level,
            Some(ref data) => {
                let data_index = concurrent::get_and_increment_named_value(self.name);
                data.get(data_index)
                    .map(|level| *level > 0)
                    .unwrap_or(self.default_level)
            }
        };
        if high {
            1 << (self.pin % 32)
        } else {
            0
        }
    }

    fn write(&mut self, index: usize, value: u32) {
        self.writes.lock().unwrap().push((index, value));
        self.words[index] = value;
    }
}

/// Hands out simulated register blocks and counts how often it was asked to.
#[derive(Debug)]
pub struct Mapper {
    name: &'static str,
    pin: u8,
    data_to_read: Option<Arc<Vec<u8>>>,
    default_level: bool,
    fail: bool,
    maps: Arc<AtomicUsize>,
    writes: WriteLog,
}

impl Mapper {
    pub fn new(name: &'static str, pin: u8) -> Mapper {
        concurrent::set_named_value(name, 0);
        Mapper {
            name,
            pin,
            data_to_read: None,
            default_level: true,
            fail: false,
            maps: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A mapper for a machine without GPIO devices.
    pub fn failing(name: &'static str, pin: u8) -> Mapper {
        Mapper {
            fail: true,
            ..Mapper::new(name, pin)
        }
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data_to_read = Some(Arc::new(data));
        concurrent::set_named_value(self.name, 0);
    }

    pub fn set_default_level(&mut self, high: bool) {
        self.default_level = high;
    }

    /// Shares the number of successful and failed `map` calls.
    pub fn map_count(&self) -> Arc<AtomicUsize> {
        self.maps.clone()
    }

    pub fn write_log(&self) -> WriteLog {
        self.writes.clone()
    }
}

/// Restarts the replay for the next read.
pub fn rewind(name: &'static str) {
    concurrent::set_named_value(name, 0);
}

impl mmio::RegisterMapper for Mapper {
    type Map = Registers;

    fn map(&mut self) -> Result<Registers, MmioError> {
        self.maps.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(MmioError::DeviceOpen {
                restricted: PathBuf::from("/dev/gpiomem"),
                privileged: PathBuf::from("/dev/mem"),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        Ok(Registers {
            words: [0; 16],
            name: self.name,
            pin: self.pin,
            data_to_read: self.data_to_read.clone(),
            default_level: self.default_level,
            writes: self.writes.clone(),
        })
    }
}
