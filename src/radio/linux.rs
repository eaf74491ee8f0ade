//! Linux host backend: nRF24L01+ on spidev with CE on a GPIO character device.

use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};
use tracing::info;

use super::nrf24::Nrf24;
use super::RadioError;
use crate::config::RadioConfig;
use crate::error::Result;

/// Transceiver type produced by [`open`]
pub type LinuxNrf24 = Nrf24<SpidevDevice, CdevPin, Delay>;

/// Consumer label shown for the CE line in `gpioinfo`
const CE_CONSUMER: &str = "hm-link";

/// Open and initialize the transceiver described by `config`
///
/// # Errors
///
/// Returns `Radio(Bus)` if the SPI device or GPIO line cannot be opened and
/// `Radio(NotDetected)` if no chip answers.
pub fn open(config: &RadioConfig) -> Result<LinuxNrf24> {
    let mut spi = SpidevDevice::open(&config.spi_device).map_err(|e| {
        RadioError::Bus(format!("Failed to open {}: {:?}", config.spi_device, e))
    })?;

    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(config.spi_speed_hz)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.0
        .configure(&options)
        .map_err(|e| RadioError::Bus(format!("Failed to configure {}: {}", config.spi_device, e)))?;

    let line = Chip::new(&config.gpio_chip)
        .and_then(|mut chip| chip.get_line(config.ce_line))
        .and_then(|line| line.request(LineRequestFlags::OUTPUT, 0, CE_CONSUMER))
        .map_err(|e| {
            RadioError::Bus(format!(
                "Failed to request CE line {} on {}: {:?}",
                config.ce_line, config.gpio_chip, e
            ))
        })?;
    let ce = CdevPin::new(line)
        .map_err(|e| RadioError::Bus(format!("Failed to wrap CE line: {:?}", e)))?;

    let radio = Nrf24::new(spi, ce, Delay)?;
    info!(
        "nRF24L01+ ready on {} (CE {}:{})",
        config.spi_device, config.gpio_chip, config.ce_line
    );
    Ok(radio)
}
