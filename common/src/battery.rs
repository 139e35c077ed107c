use std::{thread, time::Duration};

use log::{info, warn};

use crate::error::SensorError;

/// A fuel gauge returning the raw state of charge. Readings may fall outside
/// 0..=100; callers normalize before reporting.
pub trait BatteryGauge {
    fn read_percent(&mut self) -> Result<i32, SensorError>;
}

/// Reads the gauge up to `attempts` times, sleeping `delay` between failures.
/// Exhausting the attempts degrades to an unknown battery level.
pub fn read_with_retry(
    gauge: &mut dyn BatteryGauge,
    attempts: u8,
    delay: Duration,
) -> Option<i32> {
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        match gauge.read_percent() {
            Ok(percent) => {
                info!("battery percent is {percent}%");
                return Some(percent);
            }
            Err(err) => {
                warn!("battery read attempt {attempt}/{attempts} failed: {err}");
                if attempt < attempts && !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }

    warn!("giving up on the battery gauge; battery level unknown");
    None
}

/// SMBus packet error code: CRC-8 with polynomial 0x07 and a zero seed, as
/// used by the LC709203F fuel gauge.
pub fn smbus_pec(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0_u8, |mut crc, byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Lazily reads the gauge at most once per cycle.
pub struct BatteryCache<'a> {
    gauge: Option<&'a mut dyn BatteryGauge>,
    attempts: u8,
    delay: Duration,
    reading: Option<Option<i32>>,
}

impl<'a> BatteryCache<'a> {
    pub fn new(gauge: Option<&'a mut dyn BatteryGauge>, attempts: u8, delay: Duration) -> Self {
        Self {
            gauge,
            attempts,
            delay,
            reading: None,
        }
    }

    pub fn percent(&mut self) -> Option<i32> {
        if let Some(reading) = self.reading {
            return reading;
        }

        let reading = match self.gauge.as_deref_mut() {
            Some(gauge) => read_with_retry(gauge, self.attempts, self.delay),
            None => {
                info!("no battery sensor on this board");
                None
            }
        };
        self.reading = Some(reading);
        reading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedGauge {
        readings: Vec<Result<i32, SensorError>>,
        calls: usize,
    }

    impl ScriptedGauge {
        fn new(readings: Vec<Result<i32, SensorError>>) -> Self {
            Self { readings, calls: 0 }
        }
    }

    impl BatteryGauge for ScriptedGauge {
        fn read_percent(&mut self) -> Result<i32, SensorError> {
            let reading = self
                .readings
                .get(self.calls)
                .cloned()
                .unwrap_or(Err(SensorError::Checksum));
            self.calls += 1;
            reading
        }
    }

    #[test]
    fn retries_until_a_reading_succeeds() {
        let mut gauge = ScriptedGauge::new(vec![
            Err(SensorError::Bus("nack".into())),
            Err(SensorError::Checksum),
            Ok(64),
        ]);
        assert_eq!(read_with_retry(&mut gauge, 5, Duration::ZERO), Some(64));
        assert_eq!(gauge.calls, 3);
    }

    #[test]
    fn degrades_to_unknown_after_the_attempt_budget() {
        let mut gauge = ScriptedGauge::new(Vec::new());
        assert_eq!(read_with_retry(&mut gauge, 5, Duration::ZERO), None);
        assert_eq!(gauge.calls, 5);
    }

    /// Finds its chip on the first successful bus transaction.
    struct LazyGauge {
        detect_failures: usize,
        detected: bool,
        calls: usize,
    }

    impl BatteryGauge for LazyGauge {
        fn read_percent(&mut self) -> Result<i32, SensorError> {
            self.calls += 1;
            if !self.detected {
                if self.calls <= self.detect_failures {
                    return Err(SensorError::Bus("no fuel gauge found".into()));
                }
                self.detected = true;
            }
            Ok(42)
        }
    }

    #[test]
    fn chip_detection_failures_use_the_read_attempts() {
        let mut gauge = LazyGauge {
            detect_failures: 4,
            detected: false,
            calls: 0,
        };
        assert_eq!(read_with_retry(&mut gauge, 5, Duration::ZERO), Some(42));
        assert_eq!(gauge.calls, 5);
        assert!(gauge.detected);
    }

    #[test]
    fn pec_matches_the_crc8_check_value() {
        assert_eq!(smbus_pec(b"123456789"), 0xF4);
        assert_eq!(smbus_pec(&[]), 0x00);
    }

    #[test]
    fn cache_reads_the_gauge_once() {
        let mut gauge = ScriptedGauge::new(vec![Ok(80), Ok(10)]);
        {
            let mut cache = BatteryCache::new(Some(&mut gauge), 5, Duration::ZERO);
            assert_eq!(cache.percent(), Some(80));
            assert_eq!(cache.percent(), Some(80));
        }
        assert_eq!(gauge.calls, 1);
    }

    #[test]
    fn cache_without_a_gauge_is_unknown() {
        let mut cache = BatteryCache::new(None, 5, Duration::ZERO);
        assert_eq!(cache.percent(), None);
    }
}
