use core::convert::{Infallible, TryFrom};
use core::fmt;
use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::delay::{SleepDelay, SpinDelay};
use crate::gpio::{Pin, MAX_PIN};
use crate::mmio::{GpioMemMapper, MmioError, RegisterMapper};
use crate::sched::{PriorityGuard, RealtimeScheduler, Scheduler};

/// The number of pulses the sensor sends: one preamble pulse followed by 40 data bits.
pub const DHT_PULSES: usize = 41;
/// The default poll count after which a phase is considered to have timed out.
pub const DHT_MAXCOUNT: u32 = 32_000;
/// The shortest start signal the DHT11 reliably responds to.
pub const MIN_START_SIGNAL_DURATION: Duration = Duration::from_millis(18);

// Pulse 0 is the sensor's fixed-width preamble. Pulse 1 carries the first data bit but
// is left out of the threshold average along with it.
const FIRST_DATA_PULSE: usize = 1;
const FIRST_THRESHOLD_PULSE: usize = 2;

#[derive(Debug, Error)]
pub enum Error {
    /// The GPIO registers could not be mapped.
    #[error(transparent)]
    Mmio(#[from] MmioError),
    /// The line did not change level within the poll limit.
    #[error("timed out waiting for the {0}")]
    Timeout(Phase),
    /// The decoded checksum byte does not match the data bytes.
    #[error("checksum mismatch: expected {expected:#04x}, received {received:#04x}")]
    Checksum { expected: u8, received: u8 },
    /// Invalid argument was provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl From<Infallible> for Error {
    fn from(error: Infallible) -> Error {
        match error {}
    }
}

/// The part of the sensor's response that was being sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// The sensor pulling the line low to acknowledge the start signal.
    Response,
    /// The low half of the given pulse.
    Low(usize),
    /// The high half of the given pulse.
    High(usize),
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Response => write!(f, "sensor response"),
            Phase::Low(pulse) => write!(f, "low phase of pulse {}", pulse),
            Phase::High(pulse) => write!(f, "high phase of pulse {}", pulse),
        }
    }
}

/// Options to modify the behavior of the driver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Options {
    /// How long the line is held high before the start signal, letting the sensor settle.
    pub wake_duration: Duration,
    /// How long the line is held low to request a reading. Cannot be below
    /// [`MIN_START_SIGNAL_DURATION`].
    pub start_signal_duration: Duration,
    /// Poll count at which any single phase times out. This is a loop count, so the
    /// real timeout depends on CPU speed.
    pub max_count: u32,
    /// Iterations to spin after releasing the line before it is sampled.
    pub settle_iterations: u32,
}

pub const DEFAULT_OPTIONS: Options = Options {
    wake_duration: Duration::from_millis(500),
    start_signal_duration: Duration::from_millis(20),
    max_count: DHT_MAXCOUNT,
    settle_iterations: 500,
};

impl Default for Options {
    fn default() -> Options {
        DEFAULT_OPTIONS
    }
}

impl Options {
    fn validate(self) -> Result<Options, Error> {
        if self.start_signal_duration < MIN_START_SIGNAL_DURATION {
            return Err(Error::InvalidArgument(
                "start signal must be at least 18ms",
            ));
        }
        if self.max_count == 0 {
            return Err(Error::InvalidArgument("max_count must be positive"));
        }
        Ok(self)
    }
}

/// Poll counts for the low and high halves of every pulse in one response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PulseSample {
    counts: [u32; DHT_PULSES * 2],
}

impl PulseSample {
    /// Wraps raw counts laid out as `[low 0, high 0, low 1, high 1, ...]`.
    pub fn from_counts(counts: [u32; DHT_PULSES * 2]) -> PulseSample {
        PulseSample { counts }
    }

    pub fn counts(&self) -> &[u32; DHT_PULSES * 2] {
        &self.counts
    }

    pub fn low(&self, pulse: usize) -> u32 {
        self.counts[2 * pulse]
    }

    pub fn high(&self, pulse: usize) -> u32 {
        self.counts[2 * pulse + 1]
    }

    /// The mean high-phase count of pulses 2 to 40, rounded down.
    ///
    /// A high phase at least this long is a 1 bit (~70us); shorter is a 0 bit (~28us).
    pub fn threshold(&self) -> u32 {
        let sum: u64 = (FIRST_THRESHOLD_PULSE..DHT_PULSES)
            .map(|pulse| u64::from(self.high(pulse)))
            .sum();
        (sum / (DHT_PULSES - FIRST_THRESHOLD_PULSE) as u64) as u32
    }
}

/// The five bytes sent by the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorFrame {
    pub humidity: u8,
    pub humidity_decimal: u8,
    pub temperature: u8,
    pub temperature_decimal: u8,
    pub checksum: u8,
}

impl From<[u8; 5]> for SensorFrame {
    fn from(bytes: [u8; 5]) -> SensorFrame {
        SensorFrame {
            humidity: bytes[0],
            humidity_decimal: bytes[1],
            temperature: bytes[2],
            temperature_decimal: bytes[3],
            checksum: bytes[4],
        }
    }
}

impl SensorFrame {
    /// Decodes the data bits of a response, most significant bit first.
    pub fn from_pulses(pulses: &PulseSample) -> SensorFrame {
        let threshold = pulses.threshold();
        trace!(threshold, "decoding pulses");

        let mut bytes = [0u8; 5];
        for (bit, pulse) in (FIRST_DATA_PULSE..DHT_PULSES).enumerate() {
            let byte = &mut bytes[bit / 8];
            *byte <<= 1;
            if pulses.high(pulse) >= threshold {
                *byte |= 1;
            }
        }
        SensorFrame::from(bytes)
    }

    pub fn bytes(&self) -> [u8; 5] {
        [
            self.humidity,
            self.humidity_decimal,
            self.temperature,
            self.temperature_decimal,
            self.checksum,
        ]
    }

    /// The checksum the data bytes should carry.
    pub fn expected_checksum(&self) -> u8 {
        let sum: u16 = self.humidity as u16
            + self.humidity_decimal as u16
            + self.temperature as u16
            + self.temperature_decimal as u16;
        // The checksum is the last 8 bits of the sum.
        sum.to_be_bytes()[1]
    }

    pub fn is_valid(&self) -> bool {
        self.checksum == self.expected_checksum()
    }

    /// Converts a frame with a valid checksum into a reading.
    pub fn reading(&self) -> Result<Reading, Error> {
        if !self.is_valid() {
            return Err(Error::Checksum {
                expected: self.expected_checksum(),
                received: self.checksum,
            });
        }
        Ok(Reading {
            humidity: self.humidity as f32,
            temperature: self.temperature as f32,
        })
    }
}

/// A humidity and temperature measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Relative humidity in percent.
    pub humidity: f32,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
}

impl From<Reading> for (f32, f32) {
    fn from(reading: Reading) -> (f32, f32) {
        (reading.humidity, reading.temperature)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RH: {:.2}%, T: {:.2}\u{00B0}C",
            self.humidity, self.temperature
        )
    }
}

/// A DHT11 on one GPIO pin of a Raspberry Pi.
///
/// The GPIO registers are mapped on the first read and reused afterwards. Reads block
/// the calling thread for a little over half a second.
pub struct Dht11<TMapper, TScheduler, TCoarseDelay, TPreciseDelay>
where
    TMapper: RegisterMapper,
{
    pin: u8,
    mapper: TMapper,
    registers: Option<TMapper::Map>,
    scheduler: TScheduler,
    coarse_delay: TCoarseDelay,
    precise_delay: TPreciseDelay,
    options: Options,
}

impl Dht11<GpioMemMapper, RealtimeScheduler, SleepDelay, SpinDelay> {
    /// Constructs a driver for the sensor on the given BCM pin of a BCM2835-based Pi,
    /// using the default options.
    pub fn new(pin: u8) -> Result<Self, Error> {
        Dht11::with_parts(
            pin,
            GpioMemMapper::default(),
            RealtimeScheduler,
            SleepDelay,
            SpinDelay,
            None,
        )
    }
}

impl<TMapper, TScheduler, TCoarseDelay, TPreciseDelay>
    Dht11<TMapper, TScheduler, TCoarseDelay, TPreciseDelay>
where
    TMapper: RegisterMapper,
    TScheduler: Scheduler,
    TCoarseDelay: DelayNs,
    TPreciseDelay: DelayNs,
{
    /// Constructs a driver from its hardware collaborators.
    ///
    /// `coarse_delay` times the long wake period and may oversleep; `precise_delay`
    /// times the start signal and must not. If `options` is `None`, then
    /// [`DEFAULT_OPTIONS`] is used.
    pub fn with_parts(
        pin: u8,
        mapper: TMapper,
        scheduler: TScheduler,
        coarse_delay: TCoarseDelay,
        precise_delay: TPreciseDelay,
        options: Option<Options>,
    ) -> Result<Self, Error> {
        if pin > MAX_PIN {
            return Err(Error::InvalidArgument("pin must be at most 53"));
        }
        Ok(Dht11 {
            pin,
            mapper,
            registers: None,
            scheduler,
            coarse_delay,
            precise_delay,
            options: options.unwrap_or(DEFAULT_OPTIONS).validate()?,
        })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Reads the sensor once, returning `(humidity, temperature)` or `None` if anything
    /// went wrong. Use [`read`](Self::read) to find out what.
    pub fn read_data(&mut self) -> Option<(f32, f32)> {
        match self.read() {
            Ok(reading) => Some(reading.into()),
            Err(err) => {
                debug!(pin = self.pin, error = %err, "DHT11 read failed");
                None
            }
        }
    }

    /// Reads the sensor once.
    ///
    /// There are no retries. The sensor needs at least a second between reads.
    pub fn read(&mut self) -> Result<Reading, Error> {
        let pulses = self.sample()?;
        let frame = SensorFrame::from_pulses(&pulses);
        match frame.reading() {
            Ok(reading) => {
                debug!(pin = self.pin, %reading, "DHT11 read");
                Ok(reading)
            }
            Err(err) => {
                warn!(pin = self.pin, bytes = ?frame.bytes(), "{}", err);
                Err(err)
            }
        }
    }

    fn sample(&mut self) -> Result<PulseSample, Error> {
        let options = self.options;
        let registers = match self.registers {
            Some(ref mut registers) => registers,
            None => self.registers.insert(self.mapper.map()?),
        };
        let mut pin = Pin::new(registers, self.pin);

        // Wake the sensor, then request a reading.
        pin.set_output();
        pin.set_high()?;
        self.coarse_delay.delay_us(micros(options.wake_duration));
        pin.set_low()?;
        self.precise_delay
            .delay_us(micros(options.start_signal_duration));

        // Release the line. It can still read low for a moment.
        pin.set_input();
        for i in 0..options.settle_iterations {
            core::hint::black_box(i);
        }

        // Everything from here until the guard drops is timing-critical.
        let guard = PriorityGuard::elevate(&mut self.scheduler);
        let pulses = read_pulses(&mut pin, options.max_count);
        drop(guard);

        if let Err(Error::Timeout(phase)) = &pulses {
            debug!(pin = self.pin, %phase, "DHT11 timed out");
        }
        pulses
    }
}

fn micros(duration: Duration) -> u32 {
    u32::try_from(duration.as_micros()).unwrap_or(u32::MAX)
}

fn read_pulses<TInput>(input_pin: &mut TInput, max_count: u32) -> Result<PulseSample, Error>
where
    TInput: InputPin<Error = Infallible>,
{
    // The sensor acknowledges by pulling the line low.
    count_while(input_pin, true, max_count, Phase::Response)?;

    let mut counts = [0u32; DHT_PULSES * 2];
    for pulse in 0..DHT_PULSES {
        counts[2 * pulse] = count_while(input_pin, false, max_count, Phase::Low(pulse))?;
        counts[2 * pulse + 1] = count_while(input_pin, true, max_count, Phase::High(pulse))?;
    }
    Ok(PulseSample { counts })
}

#[inline]
fn count_while<TInput>(
    input_pin: &mut TInput,
    level: bool,
    max_count: u32,
    phase: Phase,
) -> Result<u32, Error>
where
    TInput: InputPin<Error = Infallible>,
{
    let mut counter = 0u32;
    while input_pin.is_high()? == level {
        counter += 1;
        if counter >= max_count {
            return Err(Error::Timeout(phase));
        }
    }
    Ok(counter)
}
