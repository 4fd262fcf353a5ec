//! Exposes an [`Hcsr04`] ranging device to a host sensor framework as a
//! registerable proximity sensor.
//!
//! The framework side of the seam is the [`SensorRegistry`] trait: the
//! driver hands it a [`SensorDescriptor`] carrying the device metadata and
//! a read callback, and the framework pulls samples through that callback
//! whenever it wants one. The driver keeps at most one descriptor
//! registered and tears it down again when closed.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use embedded_hal::digital::OutputPin;
use log::*;
pub use uuid::Uuid;

use hcsr04::Hcsr04;
use proximity::Proximity;
use proximity::ProximityError;

const DRIVER_NAME: &str = "HC-SR04";
const DRIVER_VENDOR: &str = "ElecFreaks";
const DRIVER_VERSION: u32 = 1;

/// sensor classes understood by the host framework
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    Proximity,
}

/// one sample pulled from a sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub values: Vec<f32>,
}

/// callback the framework invokes to pull one sample
pub type ReadCallback = Box<dyn FnMut() -> Result<SensorReading, ProximityError> + Send>;

/// metadata and read callback bundle submitted to the registry
pub struct SensorDescriptor {
    pub uuid: Uuid,
    pub sensor_type: SensorType,
    pub name: &'static str,
    pub vendor: &'static str,
    pub version: u32,
    /// furthest reportable value in millimeters
    pub max_range: f32,
    /// resolution in millimeters
    pub resolution: f32,
    /// worst case supply current in milliamps
    pub power: f32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub required_permission: Option<String>,
    pub read: ReadCallback,
}

/// the host framework's registration surface
pub trait SensorRegistry {
    fn register_sensor(&mut self, sensor: SensorDescriptor);
    /// removing a uuid that is not registered is a no-op
    fn unregister_sensor(&mut self, uuid: Uuid);
}

/// Owns an [`Hcsr04`] and the at-most-one proximity descriptor registered
/// for it. `close` unregisters, releases the device lines, and leaves the
/// driver in a state where further operations fail with
/// [`ProximityError::Closed`].
pub struct Hcsr04SensorDriver<TRIG, ECHO, D, R> {
    device: Option<Arc<Mutex<Hcsr04<TRIG, ECHO, D>>>>,
    registry: R,
    registered: Option<Uuid>,
}

impl<TRIG, ECHO, D, R> Hcsr04SensorDriver<TRIG, ECHO, D, R>
where
    TRIG: OutputPin + Send + 'static,
    ECHO: InputPin + Send + 'static,
    D: DelayNs + Send + 'static,
    R: SensorRegistry,
{
    /// Bring up the ranging device on the given lines. Fails with the
    /// device's construction error if either line cannot be claimed.
    pub fn new(trig: TRIG, echo: ECHO, delay: D, registry: R) -> Result<Self, ProximityError> {
        let device = Hcsr04::new(trig, echo, delay)?;
        Ok(Hcsr04SensorDriver {
            device: Some(Arc::new(Mutex::new(device))),
            registry,
            registered: None,
        })
    }

    /// Submit a proximity descriptor for the device. A driver that is
    /// already registered keeps its existing descriptor.
    pub fn register_proximity_sensor(&mut self) -> Result<(), ProximityError> {
        let device = self.device.as_ref().ok_or(ProximityError::Closed)?;
        if self.registered.is_some() {
            return Ok(());
        }

        let interval = device.lock().unwrap().interval();
        let read: ReadCallback = {
            let device = Arc::clone(device);
            Box::new(move || {
                // the mutex serializes reads so concurrent framework
                // dispatch cannot interleave trigger/echo sequences
                let mm = device.lock().unwrap().get_proximity()?;
                Ok(SensorReading {
                    values: vec![mm as f32],
                })
            })
        };

        let uuid = Uuid::new_v4();
        info!("registering {DRIVER_NAME} proximity sensor {uuid}");
        self.registry.register_sensor(SensorDescriptor {
            uuid,
            sensor_type: SensorType::Proximity,
            name: DRIVER_NAME,
            vendor: DRIVER_VENDOR,
            version: DRIVER_VERSION,
            max_range: hcsr04::MAX_RANGE_MM as f32,
            resolution: hcsr04::ACCURACY_MM as f32,
            power: hcsr04::MAX_POWER_CONSUMPTION_UA as f32 / 1000.0,
            min_delay: interval,
            max_delay: interval,
            required_permission: None,
            read,
        });
        self.registered = Some(uuid);
        Ok(())
    }

    /// Remove the proximity descriptor from the registry if one is
    /// registered. Never fails.
    pub fn unregister_proximity_sensor(&mut self) {
        if let Some(uuid) = self.registered.take() {
            info!("unregistering {DRIVER_NAME} proximity sensor {uuid}");
            self.registry.unregister_sensor(uuid);
        }
    }

    /// Unregister, release the device lines, and mark the driver closed.
    /// Safe to call more than once. A descriptor the framework is still
    /// holding fails its reads with [`ProximityError::Closed`] from here
    /// on instead of touching released hardware.
    pub fn close(&mut self) {
        self.unregister_proximity_sensor();
        if let Some(device) = self.device.take() {
            device.lock().unwrap().close();
        }
    }
}
