use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::mmio::Registers;

/// The highest GPIO number on the BCM283x.
pub const MAX_PIN: u8 = 53;

// Word offsets into the GPIO register block.
const FUNCTION_SELECT: usize = 0;
const OUTPUT_SET: usize = 7;
const OUTPUT_CLEAR: usize = 10;
const PIN_LEVEL: usize = 13;

const PINS_PER_FUNCTION_SELECT: u8 = 10;
const FUNCTION_BITS: u8 = 3;
const FUNCTION_MASK: u32 = 0b111;
const FUNCTION_OUTPUT: u32 = 0b001;

/// A single GPIO pin driven through a borrowed register block.
///
/// Changing the pin's function is a read-modify-write of a register shared with nine
/// other pins, so callers must not reconfigure pins from several threads at once.
/// Level changes go through the write-only set and clear registers and only affect
/// this pin.
#[derive(Debug)]
pub struct Pin<'r, R> {
    registers: &'r mut R,
    number: u8,
}

impl<'r, R: Registers> Pin<'r, R> {
    /// Borrows `registers` to control GPIO `number`, which must be at most [`MAX_PIN`].
    pub fn new(registers: &'r mut R, number: u8) -> Pin<'r, R> {
        debug_assert!(number <= MAX_PIN);
        Pin { registers, number }
    }

    /// Configures the pin as an input.
    pub fn set_input(&mut self) {
        let (index, shift) = self.function_select();
        let value = self.registers.read(index) & !(FUNCTION_MASK << shift);
        self.registers.write(index, value);
    }

    /// Configures the pin as an output.
    pub fn set_output(&mut self) {
        self.set_input();
        let (index, shift) = self.function_select();
        let value = self.registers.read(index) | (FUNCTION_OUTPUT << shift);
        self.registers.write(index, value);
    }

    /// Returns the current level of the pin.
    #[inline]
    pub fn read_input(&self) -> bool {
        self.registers.read(PIN_LEVEL + self.bank()) & self.bit() != 0
    }

    fn function_select(&self) -> (usize, u8) {
        (
            FUNCTION_SELECT + (self.number / PINS_PER_FUNCTION_SELECT) as usize,
            (self.number % PINS_PER_FUNCTION_SELECT) * FUNCTION_BITS,
        )
    }

    // Pins 32 and up live in the second word of each level/set/clear pair.
    fn bank(&self) -> usize {
        (self.number / 32) as usize
    }

    fn bit(&self) -> u32 {
        1 << (self.number % 32)
    }
}

impl<'r, R> ErrorType for Pin<'r, R> {
    type Error = Infallible;
}

impl<'r, R: Registers> OutputPin for Pin<'r, R> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let bit = self.bit();
        self.registers.write(OUTPUT_CLEAR + self.bank(), bit);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let bit = self.bit();
        self.registers.write(OUTPUT_SET + self.bank(), bit);
        Ok(())
    }
}

impl<'r, R: Registers> InputPin for Pin<'r, R> {
    #[inline]
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_input())
    }

    #[inline]
    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.read_input())
    }
}
