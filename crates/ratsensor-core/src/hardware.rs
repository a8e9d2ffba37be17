//! DHT22 (temperature / humidity) and LTR390 (ambient light) on a Raspberry Pi.
//!
//! The frame decoding and lux conversion are plain functions so they can be
//! checked on any machine; the bus access itself needs the `hardware` feature.

/// I2C address of the LTR390.
pub const LTR390_ADDRESS: u16 = 0x53;

/// Decode a 5-byte DHT22 frame into `(temperature °C, humidity %)`.
///
/// Returns `None` on checksum mismatch or out-of-range values.
pub fn decode_dht22_frame(frame: [u8; 5]) -> Option<(f64, f64)> {
    let sum = frame[..4]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != frame[4] {
        return None;
    }

    let humidity = f64::from(u16::from_be_bytes([frame[0], frame[1]])) / 10.0;
    let magnitude = f64::from(u16::from_be_bytes([frame[2] & 0x7F, frame[3]])) / 10.0;
    let temperature = if frame[2] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };

    if !(0.0..=100.0).contains(&humidity) || !(-40.0..=80.0).contains(&temperature) {
        return None;
    }
    Some((temperature, humidity))
}

/// Convert a raw 20-bit LTR390 ALS count to lux at gain 3, 18-bit resolution.
pub fn ltr390_lux(raw: [u8; 3]) -> u32 {
    let count = u32::from(raw[0]) | (u32::from(raw[1]) << 8) | (u32::from(raw[2] & 0x0F) << 16);
    // lux = 0.6 * count / (gain * integration factor); integration factor is 1
    // at 100 ms.
    (0.6 * f64::from(count) / 3.0).round() as u32
}

#[cfg(feature = "hardware")]
pub use device::HardwareSensor;

#[cfg(feature = "hardware")]
mod device {
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use rppal::gpio::{Gpio, IoPin, Level, Mode};
    use rppal::i2c::I2c;
    use tracing::{debug, error, info, warn};

    use ratsensor_types::SensorValues;

    use super::*;
    use crate::error::{Error, Result};
    use crate::simulated::round1;
    use crate::traits::{SensorKind, SensorSource};

    const LTR390_MAIN_CTRL: u8 = 0x00;
    const LTR390_MEAS_RATE: u8 = 0x04;
    const LTR390_GAIN: u8 = 0x05;
    const LTR390_PART_ID: u8 = 0x06;
    const LTR390_ALS_DATA: u8 = 0x0D;

    /// ALS mode, sensor enabled.
    const LTR390_ENABLE_ALS: u8 = 0x02;
    /// 18-bit resolution, 100 ms measurement rate.
    const LTR390_RATE_18BIT_100MS: u8 = 0x22;
    /// Gain x3.
    const LTR390_GAIN_3: u8 = 0x01;

    const DHT_ATTEMPTS: u32 = 3;
    const DHT_RETRY_DELAY: Duration = Duration::from_millis(500);

    /// Real sensors: a DHT22 on a BCM GPIO pin and an LTR390 on an I2C bus.
    ///
    /// A sensor that fails to come up is left out and reports `None`; the
    /// other one keeps working.
    pub struct HardwareSensor {
        dht_pin: u8,
        i2c_bus: u8,
        dht: Arc<Mutex<Option<IoPin>>>,
        ltr: Arc<Mutex<Option<I2c>>>,
    }

    impl std::fmt::Debug for HardwareSensor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HardwareSensor")
                .field("dht_pin", &self.dht_pin)
                .field("i2c_bus", &self.i2c_bus)
                .finish_non_exhaustive()
        }
    }

    impl HardwareSensor {
        /// Check that the GPIO peripheral is reachable at all.
        ///
        /// Fails on machines that are not a Raspberry Pi, which is what
        /// triggers the fallback to simulated data.
        pub fn new(dht_pin: u8, i2c_bus: u8) -> Result<Self> {
            Gpio::new().map_err(|e| Error::SensorInit(format!("GPIO unavailable: {e}")))?;
            info!("Hardware sensor reader created (DHT22 on GPIO{dht_pin}, LTR390 on i2c-{i2c_bus})");
            Ok(Self {
                dht_pin,
                i2c_bus,
                dht: Arc::new(Mutex::new(None)),
                ltr: Arc::new(Mutex::new(None)),
            })
        }

        fn open_dht(pin: u8) -> std::result::Result<IoPin, rppal::gpio::Error> {
            let mut io = Gpio::new()?.get(pin)?.into_io(Mode::Output);
            io.set_high();
            Ok(io)
        }

        fn open_ltr(bus: u8) -> std::result::Result<I2c, String> {
            let mut i2c = I2c::with_bus(bus).map_err(|e| e.to_string())?;
            i2c.set_slave_address(LTR390_ADDRESS)
                .map_err(|e| e.to_string())?;
            let part = i2c
                .smbus_read_byte(LTR390_PART_ID)
                .map_err(|e| e.to_string())?;
            if part >> 4 != 0xB {
                return Err(format!("unexpected part id 0x{part:02X}"));
            }
            i2c.smbus_write_byte(LTR390_MEAS_RATE, LTR390_RATE_18BIT_100MS)
                .map_err(|e| e.to_string())?;
            i2c.smbus_write_byte(LTR390_GAIN, LTR390_GAIN_3)
                .map_err(|e| e.to_string())?;
            i2c.smbus_write_byte(LTR390_MAIN_CTRL, LTR390_ENABLE_ALS)
                .map_err(|e| e.to_string())?;
            Ok(i2c)
        }
    }

    /// Busy-wait until the pin reaches `level`; returns the elapsed time.
    fn wait_for(pin: &IoPin, level: Level, timeout: Duration) -> Option<Duration> {
        let start = Instant::now();
        while pin.read() != level {
            if start.elapsed() > timeout {
                return None;
            }
        }
        Some(start.elapsed())
    }

    fn read_dht22_frame(pin: &mut IoPin) -> Option<[u8; 5]> {
        // Host start signal: hold low >= 1 ms, then release.
        pin.set_mode(Mode::Output);
        pin.set_low();
        std::thread::sleep(Duration::from_micros(1_100));
        pin.set_high();
        pin.set_mode(Mode::Input);

        let timeout = Duration::from_micros(200);
        wait_for(pin, Level::Low, timeout)?;
        wait_for(pin, Level::High, timeout)?;
        wait_for(pin, Level::Low, timeout)?;

        let mut frame = [0u8; 5];
        for bit in 0..40 {
            wait_for(pin, Level::High, timeout)?;
            let high = wait_for(pin, Level::Low, timeout)?;
            // ~27 us high is a zero, ~70 us is a one.
            if high > Duration::from_micros(48) {
                frame[bit / 8] |= 1 << (7 - bit % 8);
            }
        }
        Some(frame)
    }

    fn read_dht22(slot: &Mutex<Option<IoPin>>) -> (Option<f64>, Option<f64>) {
        let Ok(mut guard) = slot.lock() else {
            return (None, None);
        };
        let Some(pin) = guard.as_mut() else {
            return (None, None);
        };

        for attempt in 1..=DHT_ATTEMPTS {
            if let Some((t, h)) = read_dht22_frame(pin).and_then(decode_dht22_frame) {
                if attempt > 1 {
                    debug!("DHT22: read succeeded on attempt {}", attempt);
                }
                return (Some(round1(t)), Some(round1(h)));
            }
            if attempt < DHT_ATTEMPTS {
                debug!("DHT22: attempt {} failed, retrying", attempt);
                std::thread::sleep(DHT_RETRY_DELAY);
            }
        }
        warn!("DHT22: no valid reading after {} attempts", DHT_ATTEMPTS);
        (None, None)
    }

    fn read_ltr390(slot: &Mutex<Option<I2c>>) -> Option<u32> {
        let guard = slot.lock().ok()?;
        let i2c = guard.as_ref()?;
        let mut raw = [0u8; 3];
        match i2c.write_read(&[LTR390_ALS_DATA], &mut raw) {
            Ok(()) => Some(ltr390_lux(raw)),
            Err(e) => {
                error!("LTR390: I2C read failed: {}", e);
                None
            }
        }
    }

    #[async_trait]
    impl SensorSource for HardwareSensor {
        fn kind(&self) -> SensorKind {
            SensorKind::Hardware
        }

        async fn initialize(&self) -> Result<()> {
            let (dht_pin, i2c_bus) = (self.dht_pin, self.i2c_bus);
            let dht = Arc::clone(&self.dht);
            let ltr = Arc::clone(&self.ltr);

            let failures = tokio::task::spawn_blocking(move || {
                let mut failures = Vec::new();
                match HardwareSensor::open_dht(dht_pin) {
                    Ok(pin) => {
                        info!("DHT22 initialized on GPIO{}", dht_pin);
                        if let Ok(mut slot) = dht.lock() {
                            *slot = Some(pin);
                        }
                    }
                    Err(e) => {
                        error!("Failed to initialize DHT22 on GPIO{}: {}", dht_pin, e);
                        failures.push(format!("DHT22: {e}"));
                    }
                }
                match HardwareSensor::open_ltr(i2c_bus) {
                    Ok(i2c) => {
                        info!("LTR390 initialized on i2c-{}", i2c_bus);
                        if let Ok(mut slot) = ltr.lock() {
                            *slot = Some(i2c);
                        }
                    }
                    Err(e) => {
                        error!("Failed to initialize LTR390 on i2c-{}: {}", i2c_bus, e);
                        failures.push(format!("LTR390: {e}"));
                    }
                }
                failures
            })
            .await
            .map_err(|e| Error::SensorInit(e.to_string()))?;

            if failures.is_empty() {
                Ok(())
            } else {
                Err(Error::SensorInit(failures.join("; ")))
            }
        }

        async fn read_sensors(&self) -> SensorValues {
            let dht = Arc::clone(&self.dht);
            let ltr = Arc::clone(&self.ltr);
            let read = tokio::task::spawn_blocking(move || {
                let (temperature, humidity) = read_dht22(&dht);
                let light = read_ltr390(&ltr);
                SensorValues {
                    temperature,
                    humidity,
                    light,
                }
            })
            .await;

            match read {
                Ok(values) => values,
                Err(e) => {
                    error!("Sensor read task failed: {}", e);
                    SensorValues::default()
                }
            }
        }

        async fn cleanup(&self) {
            info!("Releasing hardware sensor resources");
            if let Ok(mut slot) = self.dht.lock() {
                slot.take();
            }
            if let Ok(mut slot) = self.ltr.lock() {
                slot.take();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_checksum(bytes: [u8; 4]) -> [u8; 5] {
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        [bytes[0], bytes[1], bytes[2], bytes[3], sum]
    }

    #[test]
    fn test_decode_positive_temperature() {
        // 65.2 % RH, 35.1 °C
        let frame = with_checksum([0x02, 0x8C, 0x01, 0x5F]);
        assert_eq!(decode_dht22_frame(frame), Some((35.1, 65.2)));
    }

    #[test]
    fn test_decode_negative_temperature() {
        // 50.0 % RH, -10.1 °C
        let frame = with_checksum([0x01, 0xF4, 0x80, 0x65]);
        assert_eq!(decode_dht22_frame(frame), Some((-10.1, 50.0)));
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut frame = with_checksum([0x02, 0x8C, 0x01, 0x5F]);
        frame[4] ^= 0x01;
        assert_eq!(decode_dht22_frame(frame), None);
    }

    #[test]
    fn test_decode_rejects_out_of_range() {
        // 150 % RH
        let frame = with_checksum([0x05, 0xDC, 0x00, 0xC8]);
        assert_eq!(decode_dht22_frame(frame), None);
    }

    #[test]
    fn test_ltr390_lux() {
        assert_eq!(ltr390_lux([0, 0, 0]), 0);
        // 5000 counts -> 1000 lux
        assert_eq!(ltr390_lux([0x88, 0x13, 0x00]), 1000);
        // Upper nibble of the third byte is not part of the count.
        assert_eq!(ltr390_lux([0x88, 0x13, 0xF0]), 1000);
    }
}
