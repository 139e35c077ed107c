use core::fmt;

/// A front-panel button, identified by the single ASCII character printed
/// next to it and sent to the server.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ButtonId(u8);

impl ButtonId {
    /// # Panics
    ///
    /// Panics on non-ASCII labels; button labels are compile-time constants.
    pub const fn new(label: char) -> Self {
        assert!(label.is_ascii(), "button labels are ascii");
        Self(label as u8)
    }

    pub const fn from_ascii(code: u8) -> Self {
        Self(code)
    }

    pub const fn as_ascii(self) -> u8 {
        self.0
    }

    pub fn as_char(self) -> char {
        char::from(self.0)
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl fmt::Debug for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ButtonId({:?})", self.as_char())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatterySensing {
    None,
    /// LC709203F with a MAX17048 fallback on the same I2C bus.
    FuelGauge,
}

/// Hardware facts about one board variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub board_id: &'static str,
    /// Ordered button to GPIO map. Order is wake-alarm priority when the pin
    /// cap is smaller than the number of buttons.
    pub button_pins: &'static [(ButtonId, i32)],
    /// Hardware limit on simultaneous wake pins; `None` means unlimited.
    pub max_wake_pins: Option<usize>,
    pub battery: BatterySensing,
}

// Adafruit Feather ESP32-S2 with the 2.9" tri-color eInk FeatherWing, buttons
// on D11/D12/D13. Only one low-level pin wake is available in deep sleep.
const FEATHER_ESP32S2: DeviceProfile = DeviceProfile {
    board_id: "adafruit_feather_esp32s2",
    button_pins: &[
        (ButtonId::new('A'), 11),
        (ButtonId::new('B'), 12),
        (ButtonId::new('C'), 13),
    ],
    max_wake_pins: Some(1),
    battery: BatterySensing::FuelGauge,
};

const HOST_SIMULATOR: DeviceProfile = DeviceProfile {
    board_id: "host_simulator",
    button_pins: &[
        (ButtonId::new('A'), 1),
        (ButtonId::new('B'), 2),
        (ButtonId::new('C'), 3),
        (ButtonId::new('D'), 4),
    ],
    max_wake_pins: None,
    battery: BatterySensing::None,
};

// Same buttons as the plain simulator, with a fuel gauge fed from the environment.
const HOST_SIMULATOR_BATTERY: DeviceProfile = DeviceProfile {
    board_id: "host_simulator_battery",
    battery: BatterySensing::FuelGauge,
    ..HOST_SIMULATOR
};

const PROFILES: &[DeviceProfile] = &[FEATHER_ESP32S2, HOST_SIMULATOR, HOST_SIMULATOR_BATTERY];

impl DeviceProfile {
    pub fn lookup(board_id: &str) -> Option<Self> {
        PROFILES
            .iter()
            .find(|profile| profile.board_id == board_id)
            .cloned()
    }

    pub fn button_for_pin(&self, pin: i32) -> Option<ButtonId> {
        self.button_pins
            .iter()
            .find(|(_, button_pin)| *button_pin == pin)
            .map(|(button, _)| *button)
    }

    pub fn pin_for_button(&self, button: ButtonId) -> Option<i32> {
        self.button_pins
            .iter()
            .find(|(candidate, _)| *candidate == button)
            .map(|(_, pin)| *pin)
    }

    pub fn has_button(&self, button: ButtonId) -> bool {
        self.pin_for_button(button).is_some()
    }

    pub fn has_battery_sensor(&self) -> bool {
        self.battery != BatterySensing::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_known_boards() {
        let feather = DeviceProfile::lookup("adafruit_feather_esp32s2").unwrap();
        assert_eq!(feather.max_wake_pins, Some(1));
        assert!(feather.has_battery_sensor());
        assert_eq!(feather.button_for_pin(12), Some(ButtonId::new('B')));
        assert_eq!(feather.button_for_pin(9), None);

        let host = DeviceProfile::lookup("host_simulator").unwrap();
        assert_eq!(host.max_wake_pins, None);
        assert!(!host.has_battery_sensor());

        let gauged = DeviceProfile::lookup("host_simulator_battery").unwrap();
        assert!(gauged.has_battery_sensor());
        assert_eq!(gauged.button_pins, host.button_pins);

        assert!(DeviceProfile::lookup("magtag").is_none());
    }

    #[test]
    fn button_ids_round_trip_through_ascii() {
        let button = ButtonId::new('C');
        assert_eq!(button.as_ascii(), b'C');
        assert_eq!(ButtonId::from_ascii(b'C'), button);
        assert_eq!(button.to_string(), "C");
    }
}
