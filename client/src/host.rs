use std::{
    fs,
    io::{ErrorKind, Read},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use tracing::{error, info, warn};

use inkframe_common::{
    config::UNSET_PLACEHOLDER, render, run_cycle, BatteryGauge, CycleDevices, Display,
    FetchError, FrameBuffer, Network, NetworkConfig, NvmBacking, NvmError, PanelColor,
    RenderError, ResponseFacts, RuntimeConfig, SensorError, WakeCause, Watchdog,
};

const DEFAULT_NVM_PATH: &str = "inkframe-nvm.bin";
const DEFAULT_FRAME_PATH: &str = "inkframe-frame.ppm";
const DEFAULT_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x1f, 0x2a, 0x07];
const WATCHDOG_POLL: Duration = Duration::from_secs(1);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let battery = std::env::var("INKFRAME_BATTERY")
        .ok()
        .and_then(|value| value.trim().parse::<i32>().ok());

    let mut runtime = load_runtime_config(battery.is_some());
    let profile = runtime
        .validate()
        .context("runtime configuration is incomplete")?;
    info!("simulating board `{}`", profile.board_id);
    if battery.is_some() && !profile.has_battery_sensor() {
        warn!(
            "INKFRAME_BATTERY is ignored: board `{}` has no battery sensor",
            profile.board_id
        );
    }

    let nvm_path = PathBuf::from(env_or("INKFRAME_NVM_PATH", DEFAULT_NVM_PATH));
    let frame_path = PathBuf::from(env_or("INKFRAME_FRAME_PATH", DEFAULT_FRAME_PATH));
    let mac = match std::env::var("INKFRAME_MAC") {
        Ok(value) => parse_mac(&value).context("INKFRAME_MAC must look like aa:bb:cc:dd:ee:ff")?,
        Err(_) => DEFAULT_MAC,
    };
    let oneshot = env_flag("INKFRAME_ONESHOT");

    let mut cause = match std::env::var("INKFRAME_WAKE_PIN") {
        Ok(value) => WakeCause::Pin(
            value
                .trim()
                .parse()
                .context("INKFRAME_WAKE_PIN must be a pin number")?,
        ),
        Err(_) => WakeCause::ColdBoot,
    };

    let watchdog = SimulatedWatchdog::arm(Duration::from_secs(u64::from(
        runtime.cycle.watchdog_timeout_secs,
    )));

    loop {
        let (config, profile) = (runtime.clone(), profile.clone());
        let (nvm_path, frame_path) = (nvm_path.clone(), frame_path.clone());
        let mut cycle_watchdog = watchdog.clone();

        let report = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let mut nvm = FileNvm::new(nvm_path);
            let mut network = HttpNetwork::new(mac)?;
            let mut display = PpmDisplay { path: frame_path };
            let mut gauge = battery.map(FixedGauge);

            let devices = CycleDevices {
                nvm: &mut nvm,
                battery: gauge.as_mut().map(|gauge| gauge as &mut dyn BatteryGauge),
                network: &mut network,
                display: &mut display,
                watchdog: &mut cycle_watchdog,
            };
            Ok(run_cycle(cause, &profile, &config, devices))
        })
        .await
        .context("wake cycle task panicked")??;

        info!("cycle finished: {:?}", report.outcome);
        for (button, pin) in report.alarms.pins() {
            info!("button {button} would wake the device on GPIO{pin}");
        }

        if oneshot {
            return Ok(());
        }

        watchdog.suspend();
        cause = match report.alarms.timer_secs() {
            Some(seconds) => {
                info!("simulating deep sleep for {seconds} seconds; ctrl-c to stop");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(u64::from(seconds))) => WakeCause::Timer,
                    _ = tokio::signal::ctrl_c() => return Ok(()),
                }
            }
            None => {
                info!("no timer alarm; sleeping until ctrl-c");
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for ctrl-c")?;
                return Ok(());
            }
        };
        watchdog.rearm();
    }
}

fn default_board(has_gauge: bool) -> &'static str {
    if has_gauge {
        "host_simulator_battery"
    } else {
        "host_simulator"
    }
}

fn load_runtime_config(has_gauge: bool) -> RuntimeConfig {
    let mut runtime = RuntimeConfig {
        network: NetworkConfig {
            wifi_ssid: env_or("WIFI_SSID", UNSET_PLACEHOLDER),
            wifi_pass: env_or("WIFI_PASS", ""),
            image_server_base_url: env_or("IMAGE_SERVER_BASE_URL", UNSET_PLACEHOLDER),
        },
        board: env_or("INKFRAME_BOARD", default_board(has_gauge)),
        ..Default::default()
    };
    runtime.cycle.always_render = env_flag("INKFRAME_ALWAYS_RENDER");
    runtime
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_mac(value: &str) -> anyhow::Result<[u8; 6]> {
    let octets = value
        .split(':')
        .map(|octet| u8::from_str_radix(octet, 16))
        .collect::<Result<Vec<_>, _>>()?;
    octets
        .try_into()
        .map_err(|octets: Vec<u8>| anyhow!("expected 6 octets, got {}", octets.len()))
}

/// NVM persisted to a small file; a missing file is a freshly flashed device.
struct FileNvm {
    path: PathBuf,
}

impl FileNvm {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Result<Vec<u8>, NvmError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(NvmError::Read(format!("{}: {err}", self.path.display()))),
        }
    }
}

impl NvmBacking for FileNvm {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), NvmError> {
        let bytes = self.load()?;
        buf.fill(0);
        if let Some(stored) = bytes.get(offset..) {
            let len = stored.len().min(buf.len());
            buf[..len].copy_from_slice(&stored[..len]);
        }
        Ok(())
    }

    fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<(), NvmError> {
        let mut bytes = self.load().map_err(|err| NvmError::Write(err.to_string()))?;
        if bytes.len() < offset + data.len() {
            bytes.resize(offset + data.len(), 0);
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
        fs::write(&self.path, &bytes)
            .map_err(|err| NvmError::Write(format!("{}: {err}", self.path.display())))
    }
}

/// Blocking HTTP over the host's network stack; there is no radio to manage.
struct HttpNetwork {
    client: reqwest::blocking::Client,
    mac: [u8; 6],
    response: Option<reqwest::blocking::Response>,
}

impl HttpNetwork {
    fn new(mac: [u8; 6]) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("inkframe-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            mac,
            response: None,
        })
    }
}

impl Network for HttpNetwork {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn connect(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    fn get(&mut self, url: &str, timeout: Duration) -> Result<ResponseFacts, FetchError> {
        self.response = None;
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|err| {
                if err.is_connect() {
                    FetchError::Connect(err.to_string())
                } else {
                    FetchError::Transport(err.to_string())
                }
            })?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let facts = ResponseFacts {
            status: response.status().as_u16(),
            etag: header("etag"),
            content_type: header("content-type"),
            content_length: response
                .content_length()
                .and_then(|len| usize::try_from(len).ok()),
            refresh_in: header("x-refresh-in"),
        };

        self.response = Some(response);
        Ok(facts)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, FetchError> {
        let Some(response) = self.response.as_mut() else {
            return Ok(0);
        };
        response
            .read(buf)
            .map_err(|err| FetchError::Body(err.to_string()))
    }

    fn disconnect(&mut self) {
        self.response = None;
        info!("network released");
    }
}

/// Writes each shown frame as a binary PPM in the panel's three inks.
struct PpmDisplay {
    path: PathBuf,
}

impl Display for PpmDisplay {
    fn show(&mut self, frame: &FrameBuffer) -> Result<(), RenderError> {
        let mut image = format!("P6\n{} {}\n255\n", render::WIDTH, render::HEIGHT).into_bytes();
        for y in 0..render::HEIGHT {
            for x in 0..render::WIDTH {
                let rgb = match frame.pixel(x, y).unwrap_or(PanelColor::White) {
                    PanelColor::White => [0xFF, 0xFF, 0xFF],
                    PanelColor::Black => [0x00, 0x00, 0x00],
                    PanelColor::Red => [0xFF, 0x00, 0x00],
                };
                image.extend_from_slice(&rgb);
            }
        }

        fs::write(&self.path, image)
            .map_err(|err| RenderError::Panel(format!("{}: {err}", self.path.display())))?;
        info!("frame written to {}", self.path.display());
        Ok(())
    }
}

struct FixedGauge(i32);

impl BatteryGauge for FixedGauge {
    fn read_percent(&mut self) -> Result<i32, SensorError> {
        Ok(self.0)
    }
}

#[derive(Debug)]
struct WatchdogState {
    last_feed: Instant,
    armed: bool,
}

/// Mimics the task watchdog: a stalled cycle terminates the process.
#[derive(Clone)]
struct SimulatedWatchdog {
    state: Arc<Mutex<WatchdogState>>,
}

impl SimulatedWatchdog {
    fn arm(timeout: Duration) -> Self {
        let state = Arc::new(Mutex::new(WatchdogState {
            last_feed: Instant::now(),
            armed: true,
        }));

        let monitor = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_POLL);
            loop {
                interval.tick().await;
                let expired = match monitor.lock() {
                    Ok(state) => state.armed && state.last_feed.elapsed() > timeout,
                    Err(_) => true,
                };
                if expired {
                    error!("watchdog not fed for {}s; resetting", timeout.as_secs());
                    std::process::exit(1);
                }
            }
        });

        info!("watchdog armed with a {}s timeout", timeout.as_secs());
        Self { state }
    }

    fn update(&self, armed: bool) {
        match self.state.lock() {
            Ok(mut state) => {
                state.last_feed = Instant::now();
                state.armed = armed;
            }
            Err(err) => warn!("watchdog state poisoned: {err}"),
        }
    }

    fn suspend(&self) {
        self.update(false);
    }

    fn rearm(&self) {
        self.update(true);
    }
}

impl Watchdog for SimulatedWatchdog {
    fn feed(&mut self) {
        self.update(true);
    }
}

#[cfg(test)]
mod tests {
    use inkframe_common::{DeviceProfile, MemoryNvm, NvmStore};

    use super::*;

    #[test]
    fn parses_colon_separated_mac() {
        assert_eq!(
            parse_mac("7c:df:a1:0b:00:e4").unwrap(),
            [0x7c, 0xdf, 0xa1, 0x0b, 0x00, 0xe4]
        );
        assert!(parse_mac("7c:df:a1").is_err());
        assert!(parse_mac("zz:df:a1:0b:00:e4").is_err());
    }

    #[test]
    fn battery_override_selects_a_gauged_board() {
        let gauged = DeviceProfile::lookup(default_board(true)).unwrap();
        assert!(gauged.has_battery_sensor());

        let plain = DeviceProfile::lookup(default_board(false)).unwrap();
        assert!(!plain.has_battery_sensor());
    }

    #[test]
    fn file_nvm_matches_memory_nvm() {
        let path = std::env::temp_dir().join(format!("inkframe-nvm-{}.bin", std::process::id()));
        let _ = fs::remove_file(&path);
        let mut file = FileNvm::new(path.clone());
        let mut memory = MemoryNvm::default();

        for backing in [&mut file as &mut dyn NvmBacking, &mut memory] {
            let mut store = NvmStore::new(backing);
            assert_eq!(store.fingerprint().unwrap(), None);
            store.persist_tag(Some("\"v1\"")).unwrap();
        }

        let mut from_file = NvmStore::new(&mut file);
        let on_disk = from_file.fingerprint().unwrap();
        let mut from_memory = NvmStore::new(&mut memory);
        assert_eq!(on_disk, from_memory.fingerprint().unwrap());

        let _ = fs::remove_file(&path);
    }
}
