//! The control loop: temperatures in, duty commands out.
//!
//! Runs on one worker task. Each session builds the fan-controller link
//! and the recovery-wrapped helper process, then ticks every 50 ms:
//! both transports get a read issued, and once per second temperatures
//! are smoothed, duty cycles looked up on the curves, and one command
//! line written to the controller. Any session-level failure tears the
//! session down and rebuilds it after a short pause.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use sirocco_core::{
    fan_duty, Error, LineFramer, LogQueue, ManualControls, Readouts, Result, Scanner, Settings,
    Ticker, NUM_FANS, NUM_SENSORS,
};
use sirocco_hardware::{
    ControllerLink, Factory, HelperChannel, PortChannel, ReadCallback, RecreateOnFailure,
    SerialBackend,
};

/// Read-issuance cadence.
pub const TICK_MS: u64 = 50;

/// Interval between duty computations and command writes.
pub const COMMAND_PERIOD_MS: u64 = 1000;

/// Pause before rebuilding a failed session.
pub const SESSION_RETRY_MS: u64 = 1000;

/// Capacity of the temperature-record line buffer.
pub const TEMP_RECORD_CAPACITY: usize = 32;

/// Weight of the newest sample in the moving average.
const SMOOTH_NEW_WEIGHT: f32 = 0.1;

/// Everything the control loop works with; the presentation layer holds
/// clones of the shared pieces.
pub struct ControlContext<B: SerialBackend> {
    pub backend: B,
    pub settings: Arc<Settings>,
    pub settings_path: PathBuf,
    pub manual: Arc<ManualControls>,
    pub readouts: Arc<Readouts>,
    pub ticker: Arc<dyn Ticker>,
    pub log: LogQueue,
    pub helper_path: PathBuf,
}

/// Run sessions until shutdown is requested.
pub async fn run<B: SerialBackend>(ctx: ControlContext<B>) {
    while !ctx.ticker.should_exit() {
        match run_session(&ctx).await {
            Ok(()) | Err(Error::Interrupted) => {}
            Err(e) => {
                ctx.log.try_log(e.to_string());
                warn!("Session ended: {}", e);
            }
        }
        if !ctx.ticker.should_exit() {
            ctx.ticker.wait_ms(SESSION_RETRY_MS).await;
        }
    }

    if let Err(e) = ctx.settings.save_if_dirty(&ctx.settings_path) {
        ctx.log.try_log(e.to_string());
        warn!("Failed to save settings: {}", e);
    }
}

/// One session: establish both transports, then tick until something
/// breaks or shutdown is requested.
async fn run_session<B: SerialBackend>(ctx: &ControlContext<B>) -> Result<()> {
    let link =
        ControllerLink::establish(&ctx.backend, &ctx.settings, ctx.ticker.as_ref(), &ctx.log)
            .await?;

    let mut helper = match RecreateOnFailure::new(
        helper_factory(ctx),
        ctx.ticker.clone(),
        ctx.log.clone(),
    )
    .await
    {
        Ok(helper) => helper,
        Err(e) => {
            link.shutdown().await;
            return Err(e);
        }
    };

    let mut smoothed: [Option<f32>; NUM_SENSORS] = [None; NUM_SENSORS];
    let mut last_command_ms = 0u64;

    let result = loop {
        if ctx.ticker.should_exit() {
            break Ok(());
        }

        if let Err(e) = helper.execute(|h| h.issue_read()).await {
            break Err(e);
        }
        if let Err(e) = link.issue_read() {
            break Err(e);
        }

        let now = ctx.ticker.now_ms();
        if now.saturating_sub(last_command_ms) > COMMAND_PERIOD_MS {
            if let Err(e) = tick(ctx, &link, &mut smoothed) {
                break Err(e);
            }
            last_command_ms = now;
        }

        if let Err(e) = ctx.settings.save_if_dirty(&ctx.settings_path) {
            ctx.log.try_log(e.to_string());
            warn!("Failed to save settings: {}", e);
        }

        ctx.ticker.wait_ms(TICK_MS).await;
    };

    helper.into_inner().shutdown().await;
    link.shutdown().await;
    result
}

/// Factory respawning the temperature helper with a fresh parser.
fn helper_factory<B: SerialBackend>(ctx: &ControlContext<B>) -> Factory<HelperChannel> {
    let helper_path = ctx.helper_path.clone();
    let readouts = ctx.readouts.clone();
    let log = ctx.log.clone();
    Box::new(move || {
        let helper_path = helper_path.clone();
        let callback = make_temp_callback(readouts.clone(), log.clone());
        Box::pin(async move { HelperChannel::spawn(&helper_path, callback) })
    })
}

/// Parse helper output lines into raw temperature readings.
///
/// A record carries up to two integers (CPU, GPU, whole degrees). A
/// missing token for one sensor yields "no reading" for that sensor
/// only, after skipping to the next token.
fn make_temp_callback(readouts: Arc<Readouts>, log: LogQueue) -> ReadCallback {
    let mut framer = LineFramer::new(TEMP_RECORD_CAPACITY);
    Box::new(move |bytes| {
        let result = framer.push(bytes, |record| {
            let mut scanner = Scanner::new(record);
            let cpu = scanner.read_int().map(|v| v as f32);
            if cpu.is_none() {
                scanner.skip_token();
            }
            let gpu = scanner.read_int().map(|v| v as f32);
            readouts.set_raw_temps([cpu, gpu]);
        });
        if result.is_err() {
            log.try_log("Temperature record exceeded the line buffer; resynchronizing");
            framer = LineFramer::new(TEMP_RECORD_CAPACITY);
        }
    })
}

/// The once-per-second step: smooth, look up, resolve overrides, emit.
fn tick<B: SerialBackend, P: PortChannel>(
    ctx: &ControlContext<B>,
    link: &ControllerLink<P>,
    smoothed: &mut [Option<f32>; NUM_SENSORS],
) -> Result<()> {
    let raw = ctx.readouts.raw_temps();
    let smoothing = ctx.settings.smooth_temps();
    for sensor in 0..NUM_SENSORS {
        smoothed[sensor] = blend(smoothed[sensor], raw[sensor], smoothing);
    }
    ctx.readouts.set_display_temps(*smoothed);

    let curve_duties: [Option<f32>; NUM_FANS] = ctx.settings.access_curves(|curves| {
        std::array::from_fn(|fan| fan_duty(&curves[fan], smoothed))
    });

    let duties = resolve_duties(curve_duties, &ctx.manual, &ctx.settings);
    ctx.readouts.set_duties(duties);
    ctx.readouts.set_rpms(link.rpms());

    let bytes = duties.map(duty_to_byte);
    link.try_send_duties(bytes)?;
    Ok(())
}

/// Apply the manual-override policy per fan.
///
/// The curve result drives the fan and the manual control follows it,
/// unless the user is holding the control or no curve produced a value;
/// then the manual value drives, and with no curve value and no user
/// hold the control snaps back to the persisted manual duty.
fn resolve_duties(
    curve_duties: [Option<f32>; NUM_FANS],
    manual: &ManualControls,
    settings: &Settings,
) -> [f32; NUM_FANS] {
    std::array::from_fn(|fan| {
        let holding = manual.is_holding(fan);
        match curve_duties[fan] {
            Some(value) if !holding => {
                manual.set_value(fan, value);
                value
            }
            curve => {
                if curve.is_none() && !holding {
                    manual.set_value(fan, settings.manual_duty(fan));
                }
                manual.value(fan)
            }
        }
    })
}

/// Exponential moving average when smoothing applies; the raw sample
/// otherwise.
fn blend(previous: Option<f32>, sample: Option<f32>, smoothing: bool) -> Option<f32> {
    match (previous, sample) {
        (Some(previous), Some(sample)) if smoothing => {
            Some(SMOOTH_NEW_WEIGHT * sample + (1.0 - SMOOTH_NEW_WEIGHT) * previous)
        }
        _ => sample,
    }
}

/// Map a 0-100 % duty cycle to the controller's 0-255 scale.
fn duty_to_byte(duty: f32) -> u8 {
    (duty / 100.0 * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirocco_core::log_queue;

    #[test]
    fn test_duty_to_byte_endpoints() {
        assert_eq!(duty_to_byte(0.0), 0);
        assert_eq!(duty_to_byte(50.0), 128);
        assert_eq!(duty_to_byte(100.0), 255);
        // Out-of-range input is clamped, not wrapped.
        assert_eq!(duty_to_byte(120.0), 255);
        assert_eq!(duty_to_byte(-5.0), 0);
    }

    #[test]
    fn test_blend_smooths_only_with_history() {
        // No history: the raw sample passes through.
        assert_eq!(blend(None, Some(50.0), true), Some(50.0));
        // History plus sample: 0.1 new / 0.9 old.
        let value = blend(Some(50.0), Some(60.0), true).unwrap();
        assert!((value - 51.0).abs() < 1e-4);
        // Smoothing off: the raw sample wins.
        assert_eq!(blend(Some(50.0), Some(60.0), false), Some(60.0));
        // A lost reading clears the average.
        assert_eq!(blend(Some(50.0), None, true), None);
    }

    #[test]
    fn test_resolve_curve_value_drives_and_updates_control() {
        let manual = ManualControls::default();
        let settings = Settings::default();

        let duties = resolve_duties([Some(70.0), None, None, None], &manual, &settings);
        assert_eq!(duties[0], 70.0);
        assert_eq!(manual.value(0), 70.0);
    }

    #[test]
    fn test_resolve_holding_user_wins() {
        let manual = ManualControls::default();
        manual.set_value(1, 25.0);
        manual.set_holding(1, true);
        let settings = Settings::default();

        let duties = resolve_duties([None, Some(90.0), None, None], &manual, &settings);
        assert_eq!(duties[1], 25.0);
        // The control keeps the user's value while held.
        assert_eq!(manual.value(1), 25.0);
    }

    #[test]
    fn test_resolve_no_curve_snaps_to_persisted_manual() {
        let manual = ManualControls::default();
        manual.set_value(2, 99.0);
        let settings = Settings::default();
        settings.set_manual_duty(2, 33.0);

        let duties = resolve_duties([None, None, None, None], &manual, &settings);
        assert_eq!(duties[2], 33.0);
        assert_eq!(manual.value(2), 33.0);
    }

    #[test]
    fn test_temp_callback_parses_both_sensors() {
        let readouts = Arc::new(Readouts::default());
        let (log, _drain) = log_queue();
        let mut callback = make_temp_callback(readouts.clone(), log);

        callback(b"\n55 61\n");
        assert_eq!(readouts.raw_temps(), [Some(55.0), Some(61.0)]);
    }

    #[test]
    fn test_temp_callback_tolerates_missing_cpu_token() {
        let readouts = Arc::new(Readouts::default());
        let (log, _drain) = log_queue();
        let mut callback = make_temp_callback(readouts.clone(), log);

        callback(b"\nn/a 61\n");
        assert_eq!(readouts.raw_temps(), [None, Some(61.0)]);
    }

    #[test]
    fn test_temp_callback_tolerates_missing_gpu_token() {
        let readouts = Arc::new(Readouts::default());
        let (log, _drain) = log_queue();
        let mut callback = make_temp_callback(readouts.clone(), log);

        callback(b"\n55\n");
        assert_eq!(readouts.raw_temps(), [Some(55.0), None]);
    }

    #[test]
    fn test_temp_callback_recovers_from_overflow() {
        let readouts = Arc::new(Readouts::default());
        let (log, mut drain) = log_queue();
        let mut callback = make_temp_callback(readouts.clone(), log);

        let long = vec![b'7'; TEMP_RECORD_CAPACITY + 2];
        callback(b"\n");
        callback(&long);
        assert!(drain.try_next().is_some());

        callback(b"tail\n48 52\n");
        assert_eq!(readouts.raw_temps(), [Some(48.0), Some(52.0)]);
    }
}
