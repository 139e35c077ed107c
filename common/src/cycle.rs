use std::time::Duration;

use log::{error, info, warn};

use crate::{
    battery::{BatteryCache, BatteryGauge},
    config::RuntimeConfig,
    decision::should_render,
    error::{FetchError, RenderError},
    network::{self, Network},
    nvm::{NvmBacking, NvmStore},
    profile::{ButtonId, DeviceProfile},
    render::{self, Display},
    request::{build_url, device_id},
    sleep::{compute_alarms, AlarmSet},
    wake::{resolve_last_button, ResolvedButton, WakeCause},
    watchdog::{LivenessGuard, Stage, Watchdog},
};

/// Hardware handles a cycle owns until it hands off to deep sleep.
pub struct CycleDevices<'a> {
    pub nvm: &'a mut dyn NvmBacking,
    /// Only consulted when the profile reports a battery sensor.
    pub battery: Option<&'a mut dyn BatteryGauge>,
    pub network: &'a mut dyn Network,
    pub display: &'a mut dyn Display,
    pub watchdog: &'a mut dyn Watchdog,
}

/// What the cycle learned about this wake; rebuilt from scratch every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeContext {
    pub cause: WakeCause,
    pub button: Option<ResolvedButton>,
    pub battery_percent: Option<i32>,
    /// Seconds until the next timer wake, before the safety floor is applied.
    pub refresh_secs: u32,
}

impl WakeContext {
    pub fn button_id(&self) -> Option<ButtonId> {
        self.button.map(|resolved| resolved.button)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Battery at or below the critical level; the network was not used.
    LowBattery,
    Rendered,
    /// Body, decode or panel failure; the fingerprint was cleared.
    RenderFailed(RenderError),
    /// Server content matched the persisted fingerprint.
    Unchanged,
    /// Non-bitmap or non-success response; nothing drawn or persisted.
    FetchRejected(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub context: WakeContext,
    pub outcome: CycleOutcome,
    pub alarms: AlarmSet,
}

/// Runs one wake, fetch, decide, render pass and returns the alarms to sleep on.
///
/// The caller has already armed the watchdog. Nothing here is fatal: every
/// failure degrades into an outcome and the device still goes to sleep.
pub fn run_cycle(
    cause: WakeCause,
    profile: &DeviceProfile,
    config: &RuntimeConfig,
    devices: CycleDevices<'_>,
) -> CycleReport {
    let CycleDevices {
        nvm,
        battery,
        network,
        display,
        watchdog,
    } = devices;
    let cycle = &config.cycle;

    let mut guard = LivenessGuard::new(watchdog);
    let mut store = NvmStore::new(nvm);

    guard.checkpoint(Stage::Context);
    info!("wake cause: {cause:?}");
    let persisted_button = store.wake_button().unwrap_or_else(|err| {
        warn!("could not read wake button from nvm: {err}");
        None
    });
    let button = resolve_last_button(cause, profile, persisted_button);

    guard.checkpoint(Stage::Battery);
    let gauge = if profile.has_battery_sensor() {
        battery
    } else {
        None
    };
    let mut battery = BatteryCache::new(
        gauge,
        cycle.battery_attempts,
        Duration::from_millis(cycle.battery_retry_delay_ms),
    );
    let battery_percent = battery.percent();

    let mut context = WakeContext {
        cause,
        button,
        battery_percent,
        refresh_secs: cycle.default_refresh_secs,
    };

    let outcome = match battery_percent {
        Some(percent) if percent <= cycle.low_battery_percent => {
            warn!("battery is critically low at {percent}%; skipping the fetch");
            guard.checkpoint(Stage::Render);
            if let Err(err) = render::render_low_battery(display) {
                error!("failed to draw low battery screen: {err}");
            }
            // Once the battery recovers the real content must be redrawn.
            persist_tag(&mut store, None);
            CycleOutcome::LowBattery
        }
        _ => fetch_and_render(
            config,
            &mut context,
            &mut store,
            network,
            display,
            &mut guard,
        ),
    };

    if let Some(ResolvedButton { button, direct: true }) = context.button {
        if let Err(err) = store.persist_wake_button(Some(button)) {
            error!("failed to persist wake button {button}: {err}");
        }
    }

    guard.checkpoint(Stage::Sleep);
    let alarms = compute_alarms(Some(context.refresh_secs), profile);

    CycleReport {
        context,
        outcome,
        alarms,
    }
}

fn fetch_and_render(
    config: &RuntimeConfig,
    context: &mut WakeContext,
    store: &mut NvmStore<'_>,
    network: &mut dyn Network,
    display: &mut dyn Display,
    guard: &mut LivenessGuard<'_>,
) -> CycleOutcome {
    let cycle = &config.cycle;

    guard.checkpoint(Stage::Fetch);
    let url = build_url(
        &config.network.image_server_base_url,
        &device_id(&network.mac_address()),
        context.battery_percent,
        context.button_id(),
    );
    let timeout = Duration::from_secs(u64::from(cycle.request_timeout_secs));

    let facts = match network::fetch_with_retry(network, &url, timeout)
        .and_then(|facts| {
            facts.log_summary();
            facts.ensure_bitmap().map(|()| facts)
        }) {
        Ok(facts) => facts,
        Err(err) => {
            error!("fetch rejected: {err}; sleeping with the default refresh interval");
            network.disconnect();
            return CycleOutcome::FetchRejected(err);
        }
    };
    context.refresh_secs = facts.refresh_secs(cycle.default_refresh_secs);

    let persisted = store.fingerprint().unwrap_or_else(|err| {
        warn!("could not read fingerprint from nvm: {err}");
        None
    });
    let decision = should_render(cycle.always_render, facts.etag.as_deref(), persisted.as_ref());

    if !decision.render {
        info!("etag unchanged; skipping render");
        network.disconnect();
        return CycleOutcome::Unchanged;
    }

    guard.checkpoint(Stage::Render);
    let body = network::read_body(network, &facts);
    network.disconnect();

    let rendered = body
        .map_err(RenderError::from)
        .and_then(|body| render::render(display, &body));

    match rendered {
        Ok(()) => {
            persist_tag(store, decision.tag.as_deref());
            CycleOutcome::Rendered
        }
        Err(err) => {
            error!("render failed: {err}; clearing the persisted etag");
            persist_tag(store, None);
            CycleOutcome::RenderFailed(err)
        }
    }
}

fn persist_tag(store: &mut NvmStore<'_>, tag: Option<&str>) {
    if let Err(err) = store.persist_tag(tag) {
        error!("failed to persist etag: {err}");
    }
}
