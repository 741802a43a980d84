//! A DHT11 driver for the Raspberry Pi that talks to the sensor by bit-banging its
//! single-wire protocol through memory-mapped GPIO registers.
//!
//! ```no_run
//! use mmio_dht11::dht11::Dht11;
//!
//! let mut sensor = Dht11::new(4)?;
//! if let Some((humidity, temperature)) = sensor.read_data() {
//!     println!("{}% {}\u{00B0}C", humidity, temperature);
//! }
//! # Ok::<(), mmio_dht11::dht11::Error>(())
//! ```

/// Delays used to time the start signal.
pub mod delay;
/// Reads humidity and temperature from a DHT11.
pub mod dht11;
/// Direction and level control for single GPIO pins.
pub mod gpio;
/// Access to the memory-mapped GPIO register block.
pub mod mmio;
/// Scoped real-time scheduling for timing-critical code.
pub mod sched;
