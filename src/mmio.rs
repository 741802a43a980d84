use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::ptr::{self, NonNull};

use thiserror::Error;
use tracing::debug;

/// Peripheral base address of the BCM2835 (Pi 1, Pi Zero).
pub const BCM2835_PERIPHERAL_BASE: u64 = 0x2000_0000;
/// Peripheral base address of the BCM2836/BCM2837 (Pi 2, Pi 3, Pi Zero 2).
pub const BCM2837_PERIPHERAL_BASE: u64 = 0x3F00_0000;
/// Peripheral base address of the BCM2711 (Pi 4).
pub const BCM2711_PERIPHERAL_BASE: u64 = 0xFE00_0000;

/// Offset of the GPIO controller from the peripheral base.
pub const GPIO_OFFSET: u64 = 0x20_0000;
/// Length in bytes of the mapped GPIO window.
pub const GPIO_LENGTH: usize = 4096;

/// GPIO-only device, accessible to the `gpio` group.
pub const GPIOMEM_PATH: &str = "/dev/gpiomem";
/// Full physical memory device, requires root.
pub const DEVMEM_PATH: &str = "/dev/mem";

#[derive(Debug, Error)]
pub enum MmioError {
    /// Neither the restricted nor the privileged device could be opened.
    #[error("unable to open {restricted:?} or {privileged:?} (missing hardware or permissions?)")]
    DeviceOpen {
        restricted: PathBuf,
        privileged: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The device was opened but could not be mapped.
    #[error("unable to map GPIO registers from {path:?}")]
    Mapping {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A block of 32-bit hardware registers addressed by word index.
pub trait Registers {
    fn read(&self, index: usize) -> u32;
    fn write(&mut self, index: usize, value: u32);
}

impl<const N: usize> Registers for [u32; N] {
    fn read(&self, index: usize) -> u32 {
        self[index]
    }

    fn write(&mut self, index: usize, value: u32) {
        self[index] = value;
    }
}

/// A source of register blocks. Each successful call produces a fresh mapping.
pub trait RegisterMapper {
    type Map: Registers;

    fn map(&mut self) -> Result<Self::Map, MmioError>;
}

/// GPIO registers mapped into this process from `/dev/gpiomem` or `/dev/mem`.
///
/// The mapping is released when this value is dropped.
#[derive(Debug)]
pub struct GpioMem {
    base: NonNull<u32>,
    words: usize,
}

impl Registers for GpioMem {
    fn read(&self, index: usize) -> u32 {
        assert!(index < self.words, "register index {} out of range", index);
        // SAFETY: `base` points to a live mapping of `words` 32-bit registers and
        // `index` is in bounds.
        unsafe { ptr::read_volatile(self.base.as_ptr().add(index)) }
    }

    fn write(&mut self, index: usize, value: u32) {
        assert!(index < self.words, "register index {} out of range", index);
        // SAFETY: as in `read`.
        unsafe { ptr::write_volatile(self.base.as_ptr().add(index), value) }
    }
}

impl Drop for GpioMem {
    fn drop(&mut self) {
        // SAFETY: the pointer and length are exactly those returned by `mmap`.
        unsafe {
            libc::munmap(
                self.base.as_ptr() as *mut libc::c_void,
                self.words * std::mem::size_of::<u32>(),
            );
        }
    }
}

/// Maps the GPIO controller of a Raspberry Pi through the kernel's memory devices.
#[derive(Clone, Debug)]
pub struct GpioMemMapper {
    restricted: PathBuf,
    privileged: PathBuf,
    peripheral_base: u64,
}

impl Default for GpioMemMapper {
    fn default() -> GpioMemMapper {
        GpioMemMapper::new(BCM2835_PERIPHERAL_BASE)
    }
}

impl GpioMemMapper {
    /// Creates a mapper for a SoC with the given peripheral base address, using the
    /// standard device paths.
    pub fn new(peripheral_base: u64) -> GpioMemMapper {
        GpioMemMapper {
            restricted: PathBuf::from(GPIOMEM_PATH),
            privileged: PathBuf::from(DEVMEM_PATH),
            peripheral_base,
        }
    }

    /// Overrides the restricted and privileged device paths.
    pub fn with_paths<P, Q>(mut self, restricted: P, privileged: Q) -> GpioMemMapper
    where
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
    {
        self.restricted = restricted.into();
        self.privileged = privileged.into();
        self
    }

    fn open(&self) -> Result<(File, PathBuf), MmioError> {
        let open = |path: &PathBuf| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_SYNC)
                .open(path)
        };
        match open(&self.restricted) {
            Ok(file) => Ok((file, self.restricted.clone())),
            Err(err) => {
                debug!(path = ?self.restricted, error = %err, "falling back to privileged device");
                open(&self.privileged)
                    .map(|file| (file, self.privileged.clone()))
                    .map_err(|source| MmioError::DeviceOpen {
                        restricted: self.restricted.clone(),
                        privileged: self.privileged.clone(),
                        source,
                    })
            }
        }
    }
}

impl RegisterMapper for GpioMemMapper {
    type Map = GpioMem;

    fn map(&mut self) -> Result<GpioMem, MmioError> {
        let (file, path) = self.open()?;
        let offset = self.peripheral_base + GPIO_OFFSET;
        // SAFETY: a fresh shared mapping is requested at a kernel-chosen address; the
        // result is checked before use.
        let address = unsafe {
            libc::mmap(
                ptr::null_mut(),
                GPIO_LENGTH,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset as libc::off_t,
            )
        };
        if address == libc::MAP_FAILED {
            return Err(MmioError::Mapping {
                path,
                source: io::Error::last_os_error(),
            });
        }
        // The mapping outlives the descriptor.
        drop(file);
        let base = NonNull::new(address as *mut u32).ok_or_else(|| MmioError::Mapping {
            path: path.clone(),
            source: io::Error::new(io::ErrorKind::Other, "mmap returned null"),
        })?;
        debug!(?path, offset, "mapped GPIO registers");
        Ok(GpioMem {
            base,
            words: GPIO_LENGTH / std::mem::size_of::<u32>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_registers_read_back_writes() {
        let mut registers = [0u32; 16];
        registers.write(3, 0xDEAD_BEEF);
        assert_eq!(registers.read(3), 0xDEAD_BEEF);
        assert_eq!(registers.read(2), 0);
    }

    #[test]
    fn missing_devices_fail_to_open() {
        let mut mapper = GpioMemMapper::default()
            .with_paths("/nonexistent/gpiomem", "/nonexistent/mem");

        match mapper.map() {
            Err(MmioError::DeviceOpen {
                restricted,
                privileged,
                source,
            }) => {
                assert_eq!(restricted, PathBuf::from("/nonexistent/gpiomem"));
                assert_eq!(privileged, PathBuf::from("/nonexistent/mem"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected DeviceOpen, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unmappable_device_fails_to_map() {
        // The null device opens read/write but refuses to be mapped.
        let mut mapper = GpioMemMapper::default().with_paths("/nonexistent/gpiomem", "/dev/null");

        match mapper.map() {
            Err(MmioError::Mapping { path, .. }) => assert_eq!(path, PathBuf::from("/dev/null")),
            other => panic!("expected Mapping, got {:?}", other.map(|_| ())),
        }
    }
}
