use log::{info, warn};

use crate::profile::{ButtonId, DeviceProfile};

/// Why this cycle started, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// A pin alarm fired on this GPIO.
    Pin(i32),
    Timer,
    /// Power-on, watchdog reset or any cause the platform cannot attribute.
    ColdBoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedButton {
    pub button: ButtonId,
    /// True when the button came from live wake evidence rather than NVM.
    pub direct: bool,
}

/// Finds the button that should be reported for this wake.
///
/// A pin wake is authoritative and never consults NVM. Any other cause falls
/// back to the persisted wake button, provided the profile still maps it.
pub fn resolve_last_button(
    cause: WakeCause,
    profile: &DeviceProfile,
    persisted: Option<ButtonId>,
) -> Option<ResolvedButton> {
    match cause {
        WakeCause::Pin(pin) => {
            info!("explicitly woken up by pin alarm on GPIO{pin}");
            match profile.button_for_pin(pin) {
                Some(button) => Some(ResolvedButton {
                    button,
                    direct: true,
                }),
                None => {
                    warn!("woken up by pin alarm for GPIO{pin} but it is not in the button map");
                    None
                }
            }
        }
        WakeCause::Timer | WakeCause::ColdBoot => {
            info!("woken up by {cause:?}; checking nvm for last wake button");
            let Some(button) = persisted else {
                info!("no wake button in nvm");
                return None;
            };
            if !profile.has_button(button) {
                warn!("nvm references button {button} as the wake button but it is not in the button map");
                return None;
            }
            info!("last wake button was {button}");
            Some(ResolvedButton {
                button,
                direct: false,
            })
        }
    }
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

    fn profile() -> DeviceProfile {
        DeviceProfile {
            board_id: "test",
            button_pins: BUTTONS,
            max_wake_pins: None,
            battery: BatterySensing::None,
        }
    }

    #[test]
    fn pin_wake_beats_persisted_button() {
        let resolved =
            resolve_last_button(WakeCause::Pin(11), &profile(), Some(ButtonId::new('C')));
        assert_eq!(
            resolved,
            Some(ResolvedButton {
                button: ButtonId::new('A'),
                direct: true,
            })
        );
    }

    #[test]
    fn unmapped_pin_wake_is_absent_even_with_persisted_button() {
        let resolved =
            resolve_last_button(WakeCause::Pin(5), &profile(), Some(ButtonId::new('B')));
        assert_eq!(resolved, None);
    }

    #[test]
    fn timer_wake_falls_back_to_persisted_button() {
        let resolved = resolve_last_button(WakeCause::Timer, &profile(), Some(ButtonId::new('B')));
        assert_eq!(
            resolved,
            Some(ResolvedButton {
                button: ButtonId::new('B'),
                direct: false,
            })
        );
    }

    #[test]
    fn stale_persisted_button_is_ignored() {
        assert_eq!(
            resolve_last_button(WakeCause::Timer, &profile(), Some(ButtonId::new('Z'))),
            None
        );
        assert_eq!(resolve_last_button(WakeCause::ColdBoot, &profile(), None), None);
    }
}
