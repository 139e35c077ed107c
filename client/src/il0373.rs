//! IL0373 driver for the 2.9" 296x128 tri-color FeatherWing panel.
//!
//! The wing has no BUSY or RESET line wired, so every wait is a fixed delay.

use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiDevice};
use log::{debug, info};

use inkframe_common::{Display, FrameBuffer, RenderError};

mod cmd {
    pub const PANEL_SETTING: u8 = 0x00;
    pub const POWER_SETTING: u8 = 0x01;
    pub const POWER_OFF: u8 = 0x02;
    pub const POWER_ON: u8 = 0x04;
    pub const BOOSTER_SOFT_START: u8 = 0x06;
    pub const DEEP_SLEEP: u8 = 0x07;
    pub const DATA_START_1: u8 = 0x10;
    pub const DISPLAY_REFRESH: u8 = 0x12;
    pub const DATA_START_2: u8 = 0x13;
    pub const PLL: u8 = 0x30;
    pub const VCOM_DATA_INTERVAL: u8 = 0x50;
    pub const RESOLUTION: u8 = 0x61;
    pub const VCM_DC: u8 = 0x82;
}

const DEEP_SLEEP_CHECK: u8 = 0xA5;

#[derive(Clone, Copy, Debug)]
enum Step {
    Cmd(u8),
    CmdData(u8, &'static [u8]),
    DelayMs(u32),
}

// 128 gates by 296 sources, KW-R mode with the internal LUT.
const INIT_SEQUENCE: &[Step] = &[
    Step::CmdData(cmd::POWER_SETTING, &[0x03, 0x00, 0x2B, 0x2B, 0x09]),
    Step::CmdData(cmd::BOOSTER_SOFT_START, &[0x17, 0x17, 0x17]),
    Step::Cmd(cmd::POWER_ON),
    Step::DelayMs(200),
    Step::CmdData(cmd::PANEL_SETTING, &[0xCF]),
    Step::CmdData(cmd::VCOM_DATA_INTERVAL, &[0x37]),
    Step::CmdData(cmd::PLL, &[0x29]),
    Step::CmdData(cmd::RESOLUTION, &[0x80, 0x01, 0x28]),
    Step::CmdData(cmd::VCM_DC, &[0x0A]),
    Step::DelayMs(20),
];

/// A full tri-color refresh takes roughly this long.
const REFRESH_DELAY_MS: u32 = 16_000;
const POWER_OFF_DELAY_MS: u32 = 100;

pub struct Il0373<SPI, DC, DELAY> {
    spi: SPI,
    dc: DC,
    delay: DELAY,
}

impl<SPI, DC, DELAY> Il0373<SPI, DC, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, dc: DC, delay: DELAY) -> Self {
        Self { spi, dc, delay }
    }

    fn command(&mut self, command: u8) -> Result<(), RenderError> {
        self.dc
            .set_low()
            .map_err(|err| RenderError::Panel(format!("dc pin: {err:?}")))?;
        self.spi
            .write(&[command])
            .map_err(|err| RenderError::Panel(format!("spi command {command:#04x}: {err:?}")))
    }

    fn data(&mut self, data: &[u8]) -> Result<(), RenderError> {
        self.dc
            .set_high()
            .map_err(|err| RenderError::Panel(format!("dc pin: {err:?}")))?;
        self.spi
            .write(data)
            .map_err(|err| RenderError::Panel(format!("spi data: {err:?}")))
    }

    fn command_with_data(&mut self, command: u8, data: &[u8]) -> Result<(), RenderError> {
        self.command(command)?;
        self.data(data)
    }

    fn power_up(&mut self) -> Result<(), RenderError> {
        for step in INIT_SEQUENCE {
            match *step {
                Step::Cmd(command) => self.command(command)?,
                Step::CmdData(command, data) => self.command_with_data(command, data)?,
                Step::DelayMs(ms) => self.delay.delay_ms(ms),
            }
        }
        debug!("il0373 powered up");
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), RenderError> {
        self.command(cmd::POWER_OFF)?;
        self.delay.delay_ms(POWER_OFF_DELAY_MS);
        self.command_with_data(cmd::DEEP_SLEEP, &[DEEP_SLEEP_CHECK])?;
        debug!("il0373 in deep sleep");
        Ok(())
    }
}

impl<SPI, DC, DELAY> Display for Il0373<SPI, DC, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    DELAY: DelayNs,
{
    fn show(&mut self, frame: &FrameBuffer) -> Result<(), RenderError> {
        let planes = frame.to_planes();

        self.power_up()?;
        self.command_with_data(cmd::DATA_START_1, &planes.black)?;
        self.command_with_data(cmd::DATA_START_2, &planes.red)?;

        info!("refreshing panel");
        self.command(cmd::DISPLAY_REFRESH)?;
        self.delay.delay_ms(REFRESH_DELAY_MS);

        self.power_down()
    }
}
