use log::{info, warn};

use crate::profile::{ButtonId, DeviceProfile};

/// Shortest timer sleep the panel tolerates between refreshes.
pub const MIN_SLEEP_SECS: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alarm {
    /// Wake when the pin is pulled low; the pin is held up by the internal pull.
    Pin { button: ButtonId, pin: i32 },
    /// Wake after this many seconds of deep sleep.
    Timer { seconds: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmSet {
    alarms: Vec<Alarm>,
}

impl AlarmSet {
    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    pub fn len(&self) -> usize {
        self.alarms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alarms.is_empty()
    }

    pub fn pins(&self) -> impl Iterator<Item = (ButtonId, i32)> + '_ {
        self.alarms.iter().filter_map(|alarm| match alarm {
            Alarm::Pin { button, pin } => Some((*button, *pin)),
            Alarm::Timer { .. } => None,
        })
    }

    pub fn timer_secs(&self) -> Option<u32> {
        self.alarms.iter().find_map(|alarm| match alarm {
            Alarm::Timer { seconds } => Some(*seconds),
            Alarm::Pin { .. } => None,
        })
    }
}

/// Pin alarms in button-map order, truncated at the profile's wake-pin cap.
pub fn build_pin_alarms(profile: &DeviceProfile) -> Vec<Alarm> {
    let mut alarms = Vec::new();

    for (index, (button, pin)) in profile.button_pins.iter().enumerate() {
        if profile.max_wake_pins.is_some_and(|max| index >= max) {
            warn!(
                "ignoring {} other button(s); board supports {} wake pin(s)",
                profile.button_pins.len() - index,
                index
            );
            break;
        }

        info!("setting pin alarm for button {button} on GPIO{pin}");
        alarms.push(Alarm::Pin {
            button: *button,
            pin: *pin,
        });
    }

    info!("waking on {} pin alarm(s)", alarms.len());
    alarms
}

/// Builds the full alarm set for the coming deep sleep. A zero or missing
/// interval leaves the device to wake on a button only.
pub fn compute_alarms(seconds: Option<u32>, profile: &DeviceProfile) -> AlarmSet {
    let timer = match seconds {
        None | Some(0) => None,
        Some(requested) if requested < MIN_SLEEP_SECS => {
            warn!(
                "sleep request was for {requested} seconds but forcing {MIN_SLEEP_SECS} seconds for display safety"
            );
            Some(MIN_SLEEP_SECS)
        }
        Some(requested) => Some(requested),
    };

    let mut alarms = build_pin_alarms(profile);
    if let Some(seconds) = timer {
        info!("setting time alarm for {seconds} seconds from now");
        alarms.push(Alarm::Timer { seconds });
    }

    if alarms.is_empty() {
        warn!("no wake alarms configured; only a reset will wake this device");
    }
    info!("total alarms: {}", alarms.len());

    AlarmSet { alarms }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::BatterySensing;

    const BUTTONS: &[(ButtonId, i32)] = &[
        (ButtonId::new('A'), 11),
        (ButtonId::new('B'), 12),
        (ButtonId::new('C'), 13),
    ];

    fn profile(max_wake_pins: Option<usize>) -> DeviceProfile {
        DeviceProfile {
            board_id: "test",
            button_pins: BUTTONS,
            max_wake_pins,
            battery: BatterySensing::None,
        }
    }

    #[test]
    fn zero_seconds_adds_no_timer() {
        let alarms = compute_alarms(Some(0), &profile(None));
        assert_eq!(alarms.timer_secs(), None);
        assert_eq!(alarms.len(), 3);
        assert_eq!(compute_alarms(None, &profile(None)).timer_secs(), None);
    }

    #[test]
    fn short_intervals_are_clamped_to_the_floor() {
        assert_eq!(compute_alarms(Some(150), &profile(None)).timer_secs(), Some(300));
        assert_eq!(compute_alarms(Some(1), &profile(None)).timer_secs(), Some(300));
    }

    #[test]
    fn long_intervals_are_kept() {
        assert_eq!(compute_alarms(Some(600), &profile(None)).timer_secs(), Some(600));
        assert_eq!(compute_alarms(Some(300), &profile(None)).timer_secs(), Some(300));
    }

    #[test]
    fn pin_cap_keeps_first_buttons_in_map_order() {
        let alarms = build_pin_alarms(&profile(Some(1)));
        assert_eq!(
            alarms,
            vec![Alarm::Pin {
                button: ButtonId::new('A'),
                pin: 11,
            }]
        );

        let alarms = build_pin_alarms(&profile(Some(2)));
        assert_eq!(alarms.len(), 2);
        assert_eq!(
            alarms[1],
            Alarm::Pin {
                button: ButtonId::new('B'),
                pin: 12,
            }
        );
    }

    #[test]
    fn zero_pin_cap_leaves_timer_only() {
        let alarms = compute_alarms(Some(900), &profile(Some(0)));
        assert_eq!(alarms.alarms(), &[Alarm::Timer { seconds: 900 }]);
    }

    #[test]
    fn pins_iterator_skips_the_timer() {
        let alarms = compute_alarms(Some(900), &profile(Some(1)));
        assert_eq!(alarms.pins().collect::<Vec<_>>(), vec![(ButtonId::new('A'), 11)]);
    }
}
