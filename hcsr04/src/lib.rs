//! Driver for the HC-SR04 ultrasonic distance sensor.
//!
//! The sensor is driven through two GPIO lines: a 10 µs pulse on the
//! trigger line starts a measurement, the sensor emits an ultrasonic
//! burst, and the width of the following high pulse on the echo line
//! encodes the round-trip time of that burst. Distance is the round-trip
//! time at the speed of sound, halved.
//!
//! ```rust,no_run
//! use embedded_hal_mock::eh1::delay::NoopDelay;
//! use embedded_hal_mock::eh1::digital::Mock as PinMock;
//! use hcsr04::Hcsr04;
//!
//! let trig = PinMock::new(&[]);
//! let echo = PinMock::new(&[]);
//! let mut sensor = Hcsr04::new(trig, echo, NoopDelay).unwrap();
//! println!("distance: {} mm", sensor.measure().unwrap());
//! ```

use std::time::Duration;
use std::time::Instant;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::Error;
use embedded_hal::digital::InputPin;
use embedded_hal::digital::OutputPin;
use log::*;

use proximity::Proximity;
use proximity::ProximityError;

/// width of the pulse that starts a measurement
const TRIGGER_PULSE_US: u32 = 10;
/// speed of sound in millimeters per microsecond
const SPEED_OF_SOUND: f32 = 0.343;
/// furthest distance the sensor can report
pub const MAX_RANGE_MM: u16 = 4000;
/// measurement resolution
pub const ACCURACY_MM: u16 = 3;
/// worst case supply current while ranging
pub const MAX_POWER_CONSUMPTION_UA: u32 = 15_000;
/// shortest supported measurement cycle
pub const MEASUREMENT_INTERVAL_MS: u64 = 60;
/// how long to wait for the echo line to rise; the longest in-range round
/// trip is ~23.3 ms and the rise follows the burst well inside that
const ECHO_RISE_TIMEOUT: Duration = Duration::from_millis(25);

fn pin_err<E: Error>(e: E) -> ProximityError {
    ProximityError::Hardware(e.kind())
}

/// echo width implied by [`MAX_RANGE_MM`]; the line is never held high
/// longer than this by an in-range target
fn max_pulse() -> Duration {
    Duration::from_micros((MAX_RANGE_MM as f32 * 2.0 / SPEED_OF_SOUND) as u64)
}

fn to_millimeters(pulse: Duration) -> u16 {
    let mm = (pulse.as_micros() as f32 * SPEED_OF_SOUND / 2.0) as u32;
    mm.min(MAX_RANGE_MM as u32) as u16
}

struct Lines<TRIG, ECHO> {
    trig: TRIG,
    echo: ECHO,
}

pub struct Hcsr04<TRIG, ECHO, D> {
    lines: Option<Lines<TRIG, ECHO>>,
    delay: D,
    interval: Duration,
}

impl<TRIG, ECHO, D> Hcsr04<TRIG, ECHO, D>
where
    TRIG: OutputPin,
    ECHO: InputPin,
    D: DelayNs,
{
    /// Claim the trigger and echo lines, parking the trigger low. Both
    /// lines are released again if either cannot be configured.
    pub fn new(mut trig: TRIG, echo: ECHO, delay: D) -> Result<Self, ProximityError> {
        trig.set_low().map_err(pin_err)?;
        Ok(Hcsr04 {
            lines: Some(Lines { trig, echo }),
            delay,
            interval: Duration::from_millis(MEASUREMENT_INTERVAL_MS),
        })
    }

    /// Run one trigger/echo cycle and return the distance in millimeters,
    /// clamped to [`MAX_RANGE_MM`].
    ///
    /// Blocks for the trigger pulse plus the echo round trip, bounded by
    /// the rise timeout and the maximum-range echo width. An echo that
    /// never rises fails with `Timeout`; one held high past the
    /// maximum-range width fails with `OutOfRange`.
    pub fn measure(&mut self) -> Result<u16, ProximityError> {
        let lines = self.lines.as_mut().ok_or(ProximityError::Closed)?;

        lines.trig.set_high().map_err(pin_err)?;
        self.delay.delay_us(TRIGGER_PULSE_US);
        lines.trig.set_low().map_err(pin_err)?;

        let armed = Instant::now();
        loop {
            if lines.echo.is_high().map_err(pin_err)? {
                break;
            }
            if armed.elapsed() > ECHO_RISE_TIMEOUT {
                return Err(ProximityError::Timeout);
            }
        }

        let rise = Instant::now();
        let limit = max_pulse();
        let pulse = loop {
            let elapsed = rise.elapsed();
            if !lines.echo.is_high().map_err(pin_err)? {
                break elapsed;
            }
            if elapsed > limit {
                let mm = (elapsed.as_micros() as f32 * SPEED_OF_SOUND / 2.0) as u32;
                return Err(ProximityError::OutOfRange(mm.min(u16::MAX as u32) as u16));
            }
        };

        let mm = to_millimeters(pulse);
        trace!("pulse={}us distance={}mm", pulse.as_micros(), mm);
        Ok(mm)
    }

    /// Release both lines. Calling close on an already released device is
    /// a no-op.
    pub fn close(&mut self) {
        if let Some(mut lines) = self.lines.take() {
            // leave the trigger parked low for the next claimant
            let _ = lines.trig.set_low();
        }
    }
}

impl<TRIG, ECHO, D> Proximity for Hcsr04<TRIG, ECHO, D>
where
    TRIG: OutputPin,
    ECHO: InputPin,
    D: DelayNs,
{
    fn set_interval(&mut self, interval: Duration) -> Result<(), ProximityError> {
        info!("set_interval: {}ms", interval.as_millis());
        if interval < Duration::from_millis(MEASUREMENT_INTERVAL_MS) {
            return Err(ProximityError::InvalidInterval(interval));
        }
        self.interval = interval;
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn get_proximity(&mut self) -> Result<u16, ProximityError> {
        self.measure()
    }

    fn close(&mut self) {
        Hcsr04::close(self)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;

    use embedded_hal::digital::ErrorKind;
    use embedded_hal::digital::ErrorType;
    use embedded_hal_mock::eh1::delay::NoopDelay;

    use super::*;

    #[derive(Debug)]
    struct PinFault;

    impl Error for PinFault {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// trigger line counting the edges driven onto it
    #[derive(Default)]
    struct TrigPin {
        highs: Arc<AtomicU32>,
        lows: Arc<AtomicU32>,
        fail: bool,
    }

    impl ErrorType for TrigPin {
        type Error = PinFault;
    }

    impl OutputPin for TrigPin {
        fn set_low(&mut self) -> Result<(), PinFault> {
            if self.fail {
                return Err(PinFault);
            }
            self.lows.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), PinFault> {
            if self.fail {
                return Err(PinFault);
            }
            self.highs.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    /// echo line that rises when the trigger falls and drops again after
    /// a fixed width, like the sensor itself
    #[derive(Clone, Default)]
    struct EchoState {
        fired: Arc<Mutex<Option<Instant>>>,
    }

    struct SimTrig {
        state: EchoState,
    }

    impl ErrorType for SimTrig {
        type Error = Infallible;
    }

    impl OutputPin for SimTrig {
        fn set_low(&mut self) -> Result<(), Infallible> {
            *self.state.fired.lock().unwrap() = Some(Instant::now());
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    struct SimEcho {
        state: EchoState,
        width: Duration,
    }

    impl ErrorType for SimEcho {
        type Error = Infallible;
    }

    impl InputPin for SimEcho {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(match *self.state.fired.lock().unwrap() {
                Some(fired) => fired.elapsed() < self.width,
                None => false,
            })
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            self.is_high().map(|high| !high)
        }
    }

    fn simulated(width: Duration) -> Hcsr04<SimTrig, SimEcho, NoopDelay> {
        let state = EchoState::default();
        let trig = SimTrig {
            state: state.clone(),
        };
        let echo = SimEcho { state, width };
        Hcsr04::new(trig, echo, NoopDelay).unwrap()
    }

    // scheduling jitter between the edges adds up to a few hundred us of
    // measured width, so keep the distance tolerance well above ACCURACY_MM
    const TOLERANCE_MM: i32 = 100;

    #[test]
    fn measure_converts_pulse_width_to_distance() {
        for (width_us, expected_mm) in [(2_915, 500), (5_831, 1_000), (11_661, 2_000)] {
            let mut sensor = simulated(Duration::from_micros(width_us));
            let mm = sensor.measure().unwrap();
            let error = mm as i32 - expected_mm;
            assert!(
                error.abs() < TOLERANCE_MM,
                "width {width_us}us gave {mm}mm, expected ~{expected_mm}mm"
            );
        }
    }

    #[test]
    fn repeated_measurements_are_independent() {
        let mut sensor = simulated(Duration::from_micros(5_831));
        let first = sensor.measure().unwrap();
        let second = sensor.measure().unwrap();
        assert!((first as i32 - second as i32).abs() < TOLERANCE_MM);
    }

    #[test]
    fn conversion_clamps_to_max_range() {
        // a width just past the 4 m round trip rounds down to the limit
        assert_eq!(to_millimeters(Duration::from_micros(23_400)), MAX_RANGE_MM);
        assert_eq!(to_millimeters(Duration::ZERO), 0);
    }

    #[test]
    fn silent_echo_times_out_within_bound() {
        let mut sensor = simulated(Duration::ZERO);
        let started = Instant::now();
        assert_eq!(sensor.measure(), Err(ProximityError::Timeout));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn echo_held_high_is_out_of_range() {
        let mut sensor = simulated(Duration::from_secs(3_600));
        let started = Instant::now();
        match sensor.measure() {
            Err(ProximityError::OutOfRange(mm)) => assert!(mm >= MAX_RANGE_MM),
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn construction_fails_when_trigger_unavailable() {
        let trig = TrigPin {
            fail: true,
            ..TrigPin::default()
        };
        let echo = SimEcho {
            state: EchoState::default(),
            width: Duration::ZERO,
        };
        match Hcsr04::new(trig, echo, NoopDelay) {
            Err(ProximityError::Hardware(_)) => {}
            Err(other) => panic!("expected Hardware error, got {other:?}"),
            Ok(_) => panic!("expected construction to fail"),
        }
    }

    #[test]
    fn trigger_pulse_drives_one_high_edge_per_measurement() {
        let trig = TrigPin::default();
        let highs = trig.highs.clone();
        let lows = trig.lows.clone();
        let echo = SimEcho {
            state: EchoState::default(),
            width: Duration::ZERO,
        };
        let mut sensor = Hcsr04::new(trig, echo, NoopDelay).unwrap();
        let _ = sensor.measure();
        assert_eq!(highs.load(Ordering::Relaxed), 1);
        // parked low at construction, then the pulse's falling edge
        assert_eq!(lows.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn close_is_idempotent_and_measure_after_close_fails() {
        let mut sensor = simulated(Duration::from_micros(2_915));
        sensor.close();
        sensor.close();
        assert_eq!(sensor.measure(), Err(ProximityError::Closed));
    }

    #[test]
    fn interval_is_validated_against_measurement_cycle() {
        let mut sensor = simulated(Duration::ZERO);
        let too_fast = Duration::from_millis(10);
        assert_eq!(
            sensor.set_interval(too_fast),
            Err(ProximityError::InvalidInterval(too_fast))
        );
        assert_eq!(
            sensor.interval(),
            Duration::from_millis(MEASUREMENT_INTERVAL_MS)
        );
        sensor.set_interval(Duration::from_millis(250)).unwrap();
        assert_eq!(sensor.interval(), Duration::from_millis(250));
    }
}
