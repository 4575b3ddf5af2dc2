//! Digital output drivers.
//!
//! Exactly two implementations sit behind [`Output`]: a sysfs GPIO line
//! for real hardware and an in-memory stand-in for development machines.
//! The choice is made once at construction; callers never branch on
//! which one is active.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use log::{info, warn};

/// A single digital output line.
pub trait OutputDriver: Send + std::fmt::Debug {
    fn write(&mut self, on: bool) -> io::Result<()>;

    /// Driver-level writes seen so far. Only the in-memory driver counts.
    #[cfg(test)]
    fn write_count(&self) -> u64 {
        0
    }
}

/// Sysfs GPIO output (`/sys/class/gpio/gpioN/value`).
#[derive(Debug)]
pub struct SysfsOutput {
    value_path: PathBuf,
}

impl SysfsOutput {
    /// Export the line and configure it as an output, initially low.
    pub fn open(pin: u8) -> io::Result<Self> {
        let base = PathBuf::from("/sys/class/gpio");
        let gpio_dir = base.join(format!("gpio{pin}"));
        if !gpio_dir.exists() {
            fs::write(base.join("export"), pin.to_string())?;
        }
        fs::write(gpio_dir.join("direction"), "out")?;
        let mut output = Self {
            value_path: gpio_dir.join("value"),
        };
        output.write(false)?;
        Ok(output)
    }
}

impl OutputDriver for SysfsOutput {
    fn write(&mut self, on: bool) -> io::Result<()> {
        let mut file = fs::OpenOptions::new().write(true).open(&self.value_path)?;
        file.write_all(if on { b"1" } else { b"0" })
    }
}

/// In-memory stand-in used off-device and in tests.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    on: bool,
    /// Count of driver-level writes, so tests can assert idempotent
    /// no-ops never reach the driver.
    pub writes: u64,
}

impl OutputDriver for MemoryOutput {
    fn write(&mut self, on: bool) -> io::Result<()> {
        self.on = on;
        self.writes += 1;
        Ok(())
    }

    #[cfg(test)]
    fn write_count(&self) -> u64 {
        self.writes
    }
}

impl MemoryOutput {
    pub fn is_on(&self) -> bool {
        self.on
    }
}

/// A named output with its driver selected at construction.
#[derive(Debug)]
pub struct Output {
    pub name: String,
    driver: Box<dyn OutputDriver>,
}

impl Output {
    /// Open the real driver for `pin`, falling back to the in-memory
    /// stand-in (logged once) when the hardware is unavailable.
    pub fn open(name: &str, pin: u8, simulate: bool) -> Self {
        let driver: Box<dyn OutputDriver> = if simulate {
            Box::new(MemoryOutput::default())
        } else {
            match SysfsOutput::open(pin) {
                Ok(driver) => {
                    info!("GPIO output initialised for {name} (pin {pin})");
                    Box::new(driver)
                }
                Err(e) => {
                    warn!("falling back to in-memory output for {name}: {e}");
                    Box::new(MemoryOutput::default())
                }
            }
        };
        Self {
            name: name.to_string(),
            driver,
        }
    }

    #[cfg(test)]
    pub fn memory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            driver: Box::new(MemoryOutput::default()),
        }
    }

    pub fn write(&mut self, on: bool) -> io::Result<()> {
        self.driver.write(on)
    }

    #[cfg(test)]
    pub fn write_count(&self) -> u64 {
        self.driver.write_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_output_tracks_level_and_writes() {
        let mut out = MemoryOutput::default();
        out.write(true).unwrap();
        out.write(false).unwrap();
        assert!(!out.is_on());
        assert_eq!(out.writes, 2);
    }

    #[test]
    fn simulated_open_never_touches_sysfs() {
        let mut out = Output::open("red_led", 17, true);
        out.write(true).unwrap();
        assert_eq!(out.write_count(), 1);
    }
}
