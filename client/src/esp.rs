use core::convert::TryInto;
use std::{thread, time::Duration};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method, Status},
    io::Read,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{FreeRtos, BLOCK},
    gpio::{AnyIOPin, AnyOutputPin, InputPin, Output, OutputPin, PinDriver},
    i2c::{I2c, I2cConfig, I2cDriver},
    peripheral::Peripheral,
    prelude::*,
    spi::{config::Config as SpiConfig, SpiDeviceDriver, SpiDriverConfig},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sys::{self, esp},
    wifi::{BlockingWifi, EspWifi},
};
use log::{error, info, warn};

use inkframe_common::{
    battery::smbus_pec, nvm::NVM_SIZE, run_cycle, AlarmSet, BatteryGauge, CycleDevices,
    DeviceProfile, FetchError, Network, NetworkConfig, NvmBacking, NvmError, ResponseFacts,
    RuntimeConfig, SensorError, WakeCause, Watchdog,
};

use crate::il0373::Il0373;

const NVS_NAMESPACE: &str = "inkframe";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const NVS_CYCLE_KEY: &str = "nvm";

const LC709203F_ADDR: u8 = 0x0B;
const LC709203F_REG_APA: u8 = 0x0B;
const LC709203F_REG_RSOC: u8 = 0x0D;
const LC709203F_REG_POWER_MODE: u8 = 0x15;
const LC709203F_APA_500MAH: u16 = 0x0010;
const LC709203F_POWER_OPERATE: u16 = 0x0001;

const MAX17048_ADDR: u8 = 0x36;
const MAX17048_REG_SOC: u8 = 0x04;
const MAX17048_REG_VERSION: u8 = 0x08;

const I2C_POWER_SETTLE_MS: u64 = 10;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let nvs_partition = EspDefaultNvsPartition::take()?;
    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_compiled_defaults(&mut runtime);
    let profile = runtime
        .validate()
        .context("runtime configuration is incomplete")?;

    init_watchdog(runtime.cycle.watchdog_timeout_secs)?;
    add_current_task_to_watchdog()?;

    let cause = wake_cause(&profile);
    let sys_loop = EspSystemEventLoop::take()?;
    let Peripherals {
        modem,
        pins,
        i2c0,
        spi2,
        ..
    } = Peripherals::take()?;

    let mut nvm = NvsCycleStore::new(nvs_partition.clone())?;

    let mut gauge = if profile.has_battery_sensor() {
        match FuelGauge::new(i2c0, pins.gpio3, pins.gpio4, pins.gpio7.downgrade_output()) {
            Ok(gauge) => Some(gauge),
            Err(err) => {
                warn!("battery gauge unavailable: {err:#}");
                None
            }
        }
    } else {
        None
    };

    let spi = SpiDeviceDriver::new_single(
        spi2,
        pins.gpio36,
        pins.gpio35,
        Option::<AnyIOPin>::None,
        Some(pins.gpio9),
        &SpiDriverConfig::new(),
        &SpiConfig::new().baudrate(4.MHz().into()),
    )
    .context("failed to set up the panel spi bus")?;
    let dc = PinDriver::output(pins.gpio10)?;
    let mut display = Il0373::new(spi, dc, FreeRtos);

    let wifi = BlockingWifi::wrap(
        EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;
    let mut network = WifiNetwork::new(wifi, runtime.network.clone())?;
    let mut watchdog = TaskWatchdog;

    let devices = CycleDevices {
        nvm: &mut nvm,
        battery: gauge.as_mut().map(|gauge| gauge as &mut dyn BatteryGauge),
        network: &mut network,
        display: &mut display,
        watchdog: &mut watchdog,
    };
    let report = run_cycle(cause, &profile, &runtime, devices);
    info!("cycle finished: {:?}", report.outcome);

    enter_deep_sleep(&report.alarms)
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 2048];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Fills unprovisioned fields from values baked in at build time.
fn ensure_compiled_defaults(runtime: &mut RuntimeConfig) {
    let network = &mut runtime.network;
    if network.wifi_ssid.is_empty() {
        network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }
    if network.wifi_pass.is_empty() {
        network.wifi_pass = option_env!("WIFI_PASS").unwrap_or_default().to_string();
    }
    if network.image_server_base_url.is_empty() {
        network.image_server_base_url = option_env!("IMAGE_SERVER_BASE_URL")
            .unwrap_or("CHANGE_ME")
            .to_string();
    }
    if let Some(board) = option_env!("INKFRAME_BOARD") {
        runtime.board = board.to_string();
    }
}

fn wake_cause(profile: &DeviceProfile) -> WakeCause {
    let cause = unsafe { sys::esp_sleep_get_wakeup_cause() };
    match cause {
        // ext0 is only ever armed for the first button in the map.
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => match profile.button_pins.first() {
            Some((_, pin)) => WakeCause::Pin(*pin),
            None => WakeCause::ColdBoot,
        },
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => {
            let status = unsafe { sys::esp_sleep_get_ext1_wakeup_status() };
            if status == 0 {
                warn!("ext1 wake without a pin in the wakeup status");
                WakeCause::ColdBoot
            } else {
                WakeCause::Pin(status.trailing_zeros() as i32)
            }
        }
        sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Timer,
        other => {
            info!("wakeup cause {other}; treating as a cold boot");
            WakeCause::ColdBoot
        }
    }
}

fn enter_deep_sleep(alarms: &AlarmSet) -> ! {
    let pins: Vec<i32> = alarms.pins().map(|(_, pin)| pin).collect();

    unsafe {
        // Keep the RTC pull-ups powered so floating buttons cannot wake us.
        sys::esp_sleep_pd_config(
            sys::esp_sleep_pd_domain_t_ESP_PD_DOMAIN_RTC_PERIPH,
            sys::esp_sleep_pd_option_t_ESP_PD_OPTION_ON,
        );
        for pin in &pins {
            sys::rtc_gpio_pullup_en(*pin);
            sys::rtc_gpio_pulldown_dis(*pin);
        }

        match pins.as_slice() {
            [] => {}
            [pin] => {
                sys::esp_sleep_enable_ext0_wakeup(*pin, 0);
            }
            pins => {
                let mask = pins.iter().fold(0_u64, |mask, pin| mask | (1_u64 << pin));
                sys::esp_sleep_enable_ext1_wakeup(
                    mask,
                    sys::esp_sleep_ext1_wakeup_mode_t_ESP_EXT1_WAKEUP_ANY_LOW,
                );
            }
        }

        if let Some(seconds) = alarms.timer_secs() {
            sys::esp_sleep_enable_timer_wakeup(u64::from(seconds) * 1_000_000);
        }

        info!("entering deep sleep");
        sys::esp_deep_sleep_start()
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    // The bootloader may already have started the task watchdog.
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    let rc = if rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        unsafe { esp_idf_svc::sys::esp_task_wdt_reconfigure(&config) }
    } else {
        rc
    };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("watchdog armed with a {timeout_sec}s timeout");
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

struct TaskWatchdog;

impl Watchdog for TaskWatchdog {
    fn feed(&mut self) {
        let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
    }
}

/// Cycle state kept as one NVS blob so both records commit together.
struct NvsCycleStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsCycleStore {
    fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        Ok(Self {
            nvs: EspNvs::new(partition, NVS_NAMESPACE, true)?,
        })
    }

    fn load(&self) -> Result<[u8; NVM_SIZE], NvmError> {
        let mut bytes = [0_u8; NVM_SIZE];
        let mut buffer = [0_u8; NVM_SIZE];
        let stored = self
            .nvs
            .get_blob(NVS_CYCLE_KEY, &mut buffer)
            .map_err(|err| NvmError::Read(format!("{err:?}")))?;
        if let Some(stored) = stored {
            let len = stored.len().min(NVM_SIZE);
            bytes[..len].copy_from_slice(&stored[..len]);
        }
        Ok(bytes)
    }
}

impl NvmBacking for NvsCycleStore {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), NvmError> {
        let bytes = self.load()?;
        let region = bytes
            .get(offset..offset + buf.len())
            .ok_or_else(|| NvmError::Read(format!("range {offset}+{} out of bounds", buf.len())))?;
        buf.copy_from_slice(region);
        Ok(())
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), NvmError> {
        let mut bytes = self.load().map_err(|err| NvmError::Write(err.to_string()))?;
        bytes
            .get_mut(offset..offset + data.len())
            .ok_or_else(|| NvmError::Write(format!("range {offset}+{} out of bounds", data.len())))?
            .copy_from_slice(data);
        self.nvs
            .set_blob(NVS_CYCLE_KEY, &bytes)
            .map_err(|err| NvmError::Write(format!("{err:?}")))
    }
}

#[derive(Clone, Copy, Debug)]
enum GaugeChip {
    Lc709203f,
    Max17048,
}

/// LC709203F on the Feather's STEMMA bus, falling back to a MAX17048. The chip
/// is probed on the first read, so detection shares the read retry budget.
struct FuelGauge<'d> {
    i2c: I2cDriver<'d>,
    chip: Option<GaugeChip>,
    _power: PinDriver<'d, AnyOutputPin, Output>,
}

impl<'d> FuelGauge<'d> {
    fn new(
        i2c: impl Peripheral<P = impl I2c> + 'd,
        sda: impl Peripheral<P = impl InputPin + OutputPin> + 'd,
        scl: impl Peripheral<P = impl InputPin + OutputPin> + 'd,
        power: AnyOutputPin,
    ) -> anyhow::Result<Self> {
        let mut power = PinDriver::output(power)?;
        power.set_high()?;
        thread::sleep(Duration::from_millis(I2C_POWER_SETTLE_MS));

        let config = I2cConfig::new().baudrate(100.kHz().into());
        let i2c = I2cDriver::new(i2c, sda, scl, &config)?;

        Ok(Self {
            i2c,
            chip: None,
            _power: power,
        })
    }

    fn chip(&mut self) -> Result<GaugeChip, SensorError> {
        if let Some(chip) = self.chip {
            return Ok(chip);
        }

        let chip = match lc709203f_init(&mut self.i2c) {
            Ok(()) => GaugeChip::Lc709203f,
            Err(lc_err) => {
                let mut version = [0_u8; 2];
                self.i2c
                    .write_read(MAX17048_ADDR, &[MAX17048_REG_VERSION], &mut version, BLOCK)
                    .map_err(|max_err| {
                        SensorError::Bus(format!(
                            "no fuel gauge found (lc709203f: {lc_err}, max17048: {max_err:?})"
                        ))
                    })?;
                GaugeChip::Max17048
            }
        };
        info!("battery gauge is {chip:?}");
        self.chip = Some(chip);
        Ok(chip)
    }
}

fn lc709203f_init(i2c: &mut I2cDriver<'_>) -> Result<(), SensorError> {
    lc709203f_write(i2c, LC709203F_REG_POWER_MODE, LC709203F_POWER_OPERATE)?;
    lc709203f_write(i2c, LC709203F_REG_APA, LC709203F_APA_500MAH)
}

fn lc709203f_write(i2c: &mut I2cDriver<'_>, register: u8, value: u16) -> Result<(), SensorError> {
    let [lo, hi] = value.to_le_bytes();
    let crc = smbus_pec(&[LC709203F_ADDR << 1, register, lo, hi]);
    i2c.write(LC709203F_ADDR, &[register, lo, hi, crc], BLOCK)
        .map_err(|err| SensorError::Bus(format!("{err:?}")))
}

fn lc709203f_read(i2c: &mut I2cDriver<'_>, register: u8) -> Result<u16, SensorError> {
    let mut reply = [0_u8; 3];
    i2c.write_read(LC709203F_ADDR, &[register], &mut reply, BLOCK)
        .map_err(|err| SensorError::Bus(format!("{err:?}")))?;

    let [lo, hi, crc] = reply;
    let expected = smbus_pec(&[
        LC709203F_ADDR << 1,
        register,
        (LC709203F_ADDR << 1) | 1,
        lo,
        hi,
    ]);
    if crc != expected {
        return Err(SensorError::Checksum);
    }
    Ok(u16::from_le_bytes([lo, hi]))
}

impl BatteryGauge for FuelGauge<'_> {
    fn read_percent(&mut self) -> Result<i32, SensorError> {
        match self.chip()? {
            GaugeChip::Lc709203f => {
                lc709203f_read(&mut self.i2c, LC709203F_REG_RSOC).map(i32::from)
            }
            GaugeChip::Max17048 => {
                let mut soc = [0_u8; 2];
                self.i2c
                    .write_read(MAX17048_ADDR, &[MAX17048_REG_SOC], &mut soc, BLOCK)
                    .map_err(|err| SensorError::Bus(format!("{err:?}")))?;
                // High byte is whole percent; the low byte is 1/256ths.
                Ok(i32::from(soc[0]))
            }
        }
    }
}

/// Station-mode Wi-Fi plus one HTTP connection per fetch.
struct WifiNetwork {
    wifi: BlockingWifi<EspWifi<'static>>,
    mac: [u8; 6],
    credentials: NetworkConfig,
    started: bool,
    http: Option<EspHttpConnection>,
}

impl WifiNetwork {
    fn new(wifi: BlockingWifi<EspWifi<'static>>, credentials: NetworkConfig) -> anyhow::Result<Self> {
        let mut mac = [0_u8; 6];
        esp!(unsafe {
            sys::esp_read_mac(mac.as_mut_ptr(), sys::esp_mac_type_t_ESP_MAC_WIFI_STA)
        })
        .context("failed to read station mac")?;

        Ok(Self {
            wifi,
            mac,
            credentials,
            started: false,
            http: None,
        })
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let network = &self.credentials;
        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: network
                    .wifi_ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("wifi ssid too long"))?,
                password: network
                    .wifi_pass
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("wifi password too long"))?,
                auth_method,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        info!("wifi started, connecting to `{}`", network.wifi_ssid);
        self.started = true;
        Ok(())
    }
}

impl Network for WifiNetwork {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn connect(&mut self) -> Result<(), FetchError> {
        if !self.started {
            self.start()
                .map_err(|err| FetchError::Connect(format!("{err:#}")))?;
        }
        if self.wifi.is_connected().unwrap_or(false) {
            return Ok(());
        }

        self.wifi
            .connect()
            .map_err(|err| FetchError::Connect(format!("{err:?}")))?;
        self.wifi
            .wait_netif_up()
            .map_err(|err| FetchError::Connect(format!("{err:?}")))?;
        info!("wifi connected and netif up");
        Ok(())
    }

    fn get(&mut self, url: &str, timeout: Duration) -> Result<ResponseFacts, FetchError> {
        self.http = None;
        let transport = |err: sys::EspError| FetchError::Transport(format!("{err:?}"));

        let config = HttpClientConfiguration {
            timeout: Some(timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let mut conn = EspHttpConnection::new(&config).map_err(transport)?;
        conn.initiate_request(Method::Get, url, &[("Accept", "image/bmp")])
            .map_err(transport)?;
        conn.initiate_response().map_err(transport)?;

        let header = |name: &str| conn.header(name).map(str::to_string);
        let facts = ResponseFacts {
            status: conn.status(),
            etag: header("ETag"),
            content_type: header("Content-Type"),
            content_length: header("Content-Length").and_then(|value| value.trim().parse().ok()),
            refresh_in: header("X-Refresh-In"),
        };

        self.http = Some(conn);
        Ok(facts)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, FetchError> {
        let Some(conn) = self.http.as_mut() else {
            return Ok(0);
        };
        conn.read(buf)
            .map_err(|err| FetchError::Body(format!("{err:?}")))
    }

    fn disconnect(&mut self) {
        self.http = None;
        if !self.started {
            return;
        }
        if let Err(err) = self.wifi.disconnect() {
            warn!("wifi disconnect failed: {err:?}");
        }
        if let Err(err) = self.wifi.stop() {
            error!("failed to stop wifi: {err:?}");
        }
        self.started = false;
        info!("radio disabled");
    }
}
