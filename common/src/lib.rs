pub mod battery;
pub mod config;
pub mod cycle;
pub mod decision;
pub mod error;
pub mod fingerprint;
pub mod network;
pub mod nvm;
pub mod profile;
pub mod render;
pub mod request;
pub mod sleep;
pub mod wake;
pub mod watchdog;

pub use battery::BatteryGauge;
pub use config::{CycleConfig, NetworkConfig, RuntimeConfig};
pub use cycle::{run_cycle, CycleDevices, CycleOutcome, CycleReport, WakeContext};
pub use decision::{should_render, RenderDecision};
pub use error::{ConfigError, FetchError, NvmError, RenderError, SensorError};
pub use fingerprint::Fingerprint;
pub use network::{Network, ResponseFacts};
pub use nvm::{MemoryNvm, NvmBacking, NvmKey, NvmStore};
pub use profile::{BatterySensing, ButtonId, DeviceProfile};
pub use render::{Display, FrameBuffer, PanelColor};
pub use sleep::{compute_alarms, Alarm, AlarmSet};
pub use wake::{resolve_last_button, ResolvedButton, WakeCause};
pub use watchdog::{LivenessGuard, Stage, Watchdog};
