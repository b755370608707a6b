//! Data-ready line on a Raspberry Pi GPIO pin

use rppal::gpio::{Gpio, InputPin, Trigger};
use tracing::info;

use super::{DataReadyLine, EdgeHandler};
use crate::error::{Device, Result, TelemetryError};

/// Rising-edge interrupt on a BCM-numbered input pin
pub struct GpioLine {
    pin: InputPin,
}

impl GpioLine {
    pub fn new(bcm_pin: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_error)?;
        let pin = gpio.get(bcm_pin).map_err(gpio_error)?.into_input_pulldown();
        Ok(Self { pin })
    }
}

fn gpio_error(err: rppal::gpio::Error) -> TelemetryError {
    TelemetryError::device(Device::Gyroscope, format!("GPIO: {}", err))
}

impl DataReadyLine for GpioLine {
    fn subscribe(&mut self, mut handler: EdgeHandler) -> Result<()> {
        self.pin
            .set_async_interrupt(Trigger::RisingEdge, move |_level| handler())
            .map_err(gpio_error)?;
        info!(pin = self.pin.pin(), "Data-ready interrupt registered");
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        self.pin.clear_async_interrupt().map_err(gpio_error)
    }
}
