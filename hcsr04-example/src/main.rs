use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::prelude::*;
use log::*;

use hcsr04_driver::Hcsr04SensorDriver;
use hcsr04_driver::SensorDescriptor;
use hcsr04_driver::SensorRegistry;
use hcsr04_driver::Uuid;

/// minimal in-process stand-in for a host sensor framework: it keeps the
/// registered descriptors and this example polls them directly
#[derive(Clone, Default)]
struct Registry {
    sensors: Arc<Mutex<Vec<SensorDescriptor>>>,
}

impl SensorRegistry for Registry {
    fn register_sensor(&mut self, sensor: SensorDescriptor) {
        info!("registered {} ({})", sensor.name, sensor.uuid);
        self.sensors.lock().unwrap().push(sensor);
    }

    fn unregister_sensor(&mut self, uuid: Uuid) {
        self.sensors.lock().unwrap().retain(|s| s.uuid != uuid);
    }
}

fn main() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();
    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("starting");

    let peripherals = Peripherals::take().context("failed to take Peripherals")?;
    let trig = PinDriver::output(peripherals.pins.gpio5)?;
    let echo = PinDriver::input(peripherals.pins.gpio6)?;

    let registry = Registry::default();
    let mut driver = Hcsr04SensorDriver::new(trig, echo, FreeRtos, registry.clone())?;
    driver.register_proximity_sensor()?;

    loop {
        for sensor in registry.sensors.lock().unwrap().iter_mut() {
            match (sensor.read)() {
                Ok(reading) => info!("distance: {} mm", reading.values[0]),
                Err(e) => warn!("read failed: {e}"),
            }
        }
        FreeRtos::delay_ms(1000);
    }
}
