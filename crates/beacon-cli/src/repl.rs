//! REPL – interactive shell driving the guidance engine by hand.
//!
//! Supported slash-commands:
//!   /help                          – show this list
//!   /status                        – session, target, last sample, counters
//!   /target x y z                  – guide toward a world-frame point
//!   /pose t px py pz qx qy qz qw   – feed one valid pose sample
//!   /lost t                        – feed a sample with lost tracking
//!   /detect content x y z [size]   – report a marker detection
//!   /markers                       – list known markers
//!   /select content                – guide toward a known marker
//!   /calibration                   – show the active calibration
//!   /pitch low high                – set pitch limits (octave exponents)
//!   /gain low high                 – set gain limits
//!   /replay file                   – feed a CSV pose trace
//!   /quit | /exit                  – disconnect and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use beacon_hal::platform::{PoseSample, PoseStatus};
use beacon_middleware::Topic;
use beacon_perception::algebra::{Quaternion, Vec3};
use beacon_perception::frames::CameraKind;
use beacon_perception::markers::{MarkerDetection, MarkerRegistry};
use beacon_runtime::calibration::{self, CalibrationStore};
use beacon_runtime::guidance_loop::{GuidanceLoop, GuidanceSample};
use beacon_runtime::session::SessionContext;
use beacon_types::EventPayload;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

const DEFAULT_MARKER_SIZE: f64 = 0.2;

/// A parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Target(Vec3),
    Pose(PoseSample),
    Lost(f64),
    Detect { content: String, position: Vec3, size: f64 },
    Markers,
    Select(String),
    Calibration,
    Pitch { low: f64, high: f64 },
    Gain { low: f64, high: f64 },
    Replay(String),
    Quit,
}

/// Parse one input line.  The error is a user-facing usage hint.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(name) = parts.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = parts.collect();

    match name {
        "/help" => Ok(Command::Help),
        "/status" => Ok(Command::Status),
        "/target" => {
            let [x, y, z] = numbers::<3>(&args, "/target x y z")?;
            Ok(Command::Target(Vec3::new(x, y, z)))
        }
        "/pose" => {
            let [t, px, py, pz, qx, qy, qz, qw] = numbers::<8>(&args, "/pose t px py pz qx qy qz qw")?;
            Ok(Command::Pose(PoseSample::valid(t, [px, py, pz], [qx, qy, qz, qw])))
        }
        "/lost" => {
            let [t] = numbers::<1>(&args, "/lost t")?;
            Ok(Command::Lost(t))
        }
        "/detect" => {
            let usage = "/detect content x y z [size]";
            let (content, rest) = args.split_first().ok_or_else(|| format!("usage: {usage}"))?;
            let (coords, size) = match rest.len() {
                3 => (rest, DEFAULT_MARKER_SIZE),
                4 => {
                    let [size] = numbers::<1>(&rest[3..], usage)?;
                    (&rest[..3], size)
                }
                _ => return Err(format!("usage: {usage}")),
            };
            let [x, y, z] = numbers::<3>(coords, usage)?;
            if size <= 0.0 {
                return Err("marker size must be positive".to_string());
            }
            Ok(Command::Detect {
                content: content.to_string(),
                position: Vec3::new(x, y, z),
                size,
            })
        }
        "/markers" => Ok(Command::Markers),
        "/select" => match args.as_slice() {
            [content] => Ok(Command::Select(content.to_string())),
            _ => Err("usage: /select content".to_string()),
        },
        "/calibration" => Ok(Command::Calibration),
        "/pitch" => {
            let [low, high] = numbers::<2>(&args, "/pitch low high")?;
            Ok(Command::Pitch { low, high })
        }
        "/gain" => {
            let [low, high] = numbers::<2>(&args, "/gain low high")?;
            Ok(Command::Gain { low, high })
        }
        "/replay" => match args.as_slice() {
            [path] => Ok(Command::Replay(path.to_string())),
            _ => Err("usage: /replay file".to_string()),
        },
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn numbers<const N: usize>(args: &[&str], usage: &str) -> Result<[f64; N], String> {
    if args.len() != N {
        return Err(format!("usage: {usage}"));
    }
    let mut out = [0.0; N];
    for (slot, raw) in out.iter_mut().zip(args) {
        *slot = raw
            .parse::<f64>()
            .map_err(|_| format!("'{raw}' is not a number (usage: {usage})"))?;
    }
    Ok(out)
}

/// Parse one pose-trace line: `timestamp,px,py,pz,qx,qy,qz,qw[,status]`.
///
/// The status column accepts `valid`, `invalid`, `initializing` or
/// `unknown`, and defaults to valid.
pub fn parse_pose_line(line: &str) -> Result<PoseSample, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 8 && fields.len() != 9 {
        return Err(format!("expected 8 or 9 fields, found {}", fields.len()));
    }
    let [t, px, py, pz, qx, qy, qz, qw] = numbers::<8>(&fields[..8], "timestamp,px,py,pz,qx,qy,qz,qw[,status]")?;
    let status = match fields.get(8).map(|s| s.to_ascii_lowercase()) {
        None => PoseStatus::Valid,
        Some(s) => match s.as_str() {
            "valid" => PoseStatus::Valid,
            "invalid" => PoseStatus::Invalid,
            "initializing" => PoseStatus::Initializing,
            "unknown" => PoseStatus::Unknown,
            other => return Err(format!("unknown status '{other}'")),
        },
    };
    Ok(PoseSample {
        timestamp: t,
        position: [px, py, pz],
        orientation: [qx, qy, qz, qw],
        status,
    })
}

/// Square marker corners around `center`, lying in the world x/z plane.
fn square_corners(center: Vec3, size: f64) -> [Vec3; 4] {
    let h = size / 2.0;
    [
        center.add(Vec3::new(-h, 0.0, -h)),
        center.add(Vec3::new(h, 0.0, -h)),
        center.add(Vec3::new(h, 0.0, h)),
        center.add(Vec3::new(-h, 0.0, h)),
    ]
}

/// Everything the shell drives.
pub struct Host {
    pub runtime: Runtime,
    pub session: SessionContext,
    pub guidance: GuidanceLoop,
    pub store: Arc<dyn CalibrationStore>,
    /// Handle is the marker's scene slot in creation order.
    pub markers: MarkerRegistry<usize>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    fed: usize,
    guided: usize,
    rejected: usize,
}

impl Host {
    /// Push one sample through the session and the guidance loop, then run a
    /// render tick as the colour camera would.
    fn feed(&self, sample: PoseSample) -> Option<GuidanceSample> {
        self.session.on_pose_available(sample);
        self.session.on_frame_available(CameraKind::Color);
        let guided = self.guidance.on_pose(&sample);
        match self.session.render_tick() {
            Ok(Some(update)) => debug!(
                t = update.timestamp,
                x = update.camera_pose.position.x,
                y = update.camera_pose.position.y,
                z = update.camera_pose.position.z,
                "render camera updated"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "render tick failed"),
        }
        guided
    }

    fn replay(&self, path: &Path) -> Result<ReplaySummary, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| format!("read {}: {e}", path.display()))?;
        let mut summary = ReplaySummary::default();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_pose_line(line) {
                Ok(sample) => {
                    summary.fed += 1;
                    if self.feed(sample).is_some() {
                        summary.guided += 1;
                    }
                }
                Err(e) => {
                    summary.rejected += 1;
                    warn!(line = index + 1, error = %e, "pose trace line rejected");
                }
            }
        }
        Ok(summary)
    }

    fn detect(&mut self, content: String, position: Vec3, size: f64) -> bool {
        let detection = MarkerDetection {
            content: content.clone(),
            translation: position,
            orientation: Quaternion::identity(),
            corners: square_corners(position, size),
        };
        let timestamp = self
            .session
            .latest_pose()
            .map(|p| p.timestamp)
            .unwrap_or_default();
        let created = self.markers.update(&[detection], timestamp);
        if created.is_empty() {
            return false;
        }
        let slot = self.markers.len() - 1;
        self.markers.attach_handle(&content, slot);
        true
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut host: Host, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut alerts = host.guidance.bus().subscribe_to(Topic::SystemAlerts);

    loop {
        while let Some(event) = alerts.try_next() {
            print_alert(&event.payload);
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "beacon>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match parse_command(line) {
            Ok(c) => c,
            Err(e) => {
                println!("{} {}. Type {} for available commands.", "Error:".red(), e.yellow(), "/help".bold());
                continue;
            }
        };

        match command {
            Command::Help => cmd_help(),
            Command::Status => cmd_status(&host),
            Command::Target(target) => {
                host.guidance.on_target_changed(target);
                println!("{} target set to {}", "✓".green(), fmt_vec(target).bold());
            }
            Command::Pose(sample) => print_outcome(host.feed(sample)),
            Command::Lost(timestamp) => {
                let sample = PoseSample {
                    status: PoseStatus::Invalid,
                    ..PoseSample::valid(timestamp, [0.0; 3], [0.0, 0.0, 0.0, 1.0])
                };
                host.feed(sample);
            }
            Command::Detect { content, position, size } => {
                let created = host.detect(content.clone(), position, size);
                let verb = if created { "registered" } else { "updated" };
                println!("{} marker {} {}", "✓".green(), content.bold(), verb);
            }
            Command::Markers => cmd_markers(&host),
            Command::Select(content) => match host.markers.target_for(&content) {
                Some(target) => {
                    host.guidance.on_target_changed(target);
                    println!("{} guiding toward marker {} at {}", "✓".green(), content.bold(), fmt_vec(target));
                }
                None => println!("{} '{}'", "Unknown marker:".red(), content.yellow()),
            },
            Command::Calibration => cmd_calibration(&host),
            Command::Pitch { low, high } => {
                let result = host.guidance.calibration().update_pitch_limits(low, high);
                report_calibration(&host, result.map(|_| ()));
            }
            Command::Gain { low, high } => {
                let result = host.guidance.calibration().update_gain_limits(low, high);
                report_calibration(&host, result.map(|_| ()));
            }
            Command::Replay(path) => match host.replay(Path::new(&path)) {
                Ok(s) => println!(
                    "{} replayed {} sample(s): {} guided, {} rejected line(s)",
                    "✓".green(),
                    s.fed,
                    s.guided,
                    s.rejected
                ),
                Err(e) => println!("{}: {}", "Replay failed".red(), e),
            },
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                break;
            }
        }
    }

    shutdown.store(true, Ordering::SeqCst);
    if let Err(e) = host.session.disconnect() {
        warn!(error = %e, "disconnect failed");
    }
    let Host { runtime, guidance, .. } = host;
    runtime.block_on(guidance.shutdown());
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Beacon Commands".bold().underline());
    println!("  {}                        – session and guidance status", "/status".bold().cyan());
    println!("  {}                  – guide toward a world point", "/target x y z".bold().cyan());
    println!("  {} – feed one pose sample", "/pose t px py pz qx qy qz qw".bold().cyan());
    println!("  {}                       – feed a lost-tracking sample", "/lost t".bold().cyan());
    println!("  {}   – report a marker detection", "/detect content x y z [size]".bold().cyan());
    println!("  {}                       – list known markers", "/markers".bold().cyan());
    println!("  {}                – guide toward a marker", "/select content".bold().cyan());
    println!("  {}                   – show calibration", "/calibration".bold().cyan());
    println!("  {}   – set pitch / gain limits", "/pitch low high  /gain low high".bold().cyan());
    println!("  {}                   – feed a CSV pose trace", "/replay file".bold().cyan());
    println!("  {}                   – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(host: &Host) {
    println!("{}", "Status".bold().underline());
    println!("  Session      : {:?}", host.session.phase());
    match host.guidance.target() {
        Some(t) => println!("  Target       : {}", fmt_vec(t)),
        None => println!("  Target       : {}", "none".dimmed()),
    }
    match host.guidance.last_sample() {
        Some(s) => println!(
            "  Last sample  : t={} distance={:.3} pitch={:.1} gain={:.3}",
            s.timestamp, s.distance, s.pitch, s.gain
        ),
        None => println!("  Last sample  : {}", "none".dimmed()),
    }
    let stats = host.guidance.stats();
    println!(
        "  Samples      : {} processed, {} tracking lost, {} degenerate",
        stats.processed.load(Ordering::Relaxed),
        stats.tracking_lost.load(Ordering::Relaxed),
        stats.degenerate.load(Ordering::Relaxed)
    );
    match host.guidance.telemetry() {
        Some(t) => {
            let s = t.stats();
            println!(
                "  Telemetry    : {} sent, {} skipped, {} failed",
                s.sent.load(Ordering::Relaxed),
                s.skipped.load(Ordering::Relaxed),
                s.failed.load(Ordering::Relaxed)
            );
        }
        None => println!("  Telemetry    : {}", "disabled".dimmed()),
    }
    println!("  Markers      : {}", host.markers.len());
}

fn cmd_markers(host: &Host) {
    if host.markers.is_empty() {
        println!("  {}", "No markers seen yet.".dimmed());
        return;
    }
    let mut entries: Vec<_> = host.markers.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (content, entry) in entries {
        println!(
            "  {} at {} size={:.3} seen {}x",
            content.bold(),
            fmt_vec(entry.pose.position),
            entry.size,
            entry.sightings
        );
    }
}

fn cmd_calibration(host: &Host) {
    let mapping = host.guidance.calibration().snapshot();
    let p = mapping.parameters();
    let (pitch_low, pitch_high) = mapping.pitch_limits();
    let (gain_low, gain_high) = mapping.gain_limits();
    println!("{}", "Calibration".bold().underline());
    println!("  Pitch limits    : 2^{pitch_low} .. 2^{pitch_high}");
    println!("  Gain limits     : {gain_low} .. {gain_high}");
    println!(
        "  Gain distance   : {} .. {}",
        p.gain_distance_low_limit, p.gain_distance_high_limit
    );
    println!("  Vibration delay : {} ms", p.vibration_delay_ms);
    println!("  Voice timing    : {} ms", p.voice_timing_ms);
}

fn report_calibration(host: &Host, result: Result<(), beacon_types::GuidanceError>) {
    if let Err(e) = result {
        println!("{}: {}", "Calibration rejected".red(), e);
        return;
    }
    let params = *host.guidance.calibration().snapshot().parameters();
    match calibration::save(host.store.as_ref(), &params) {
        Ok(()) => println!("{}", "✓ Calibration updated and saved".green()),
        Err(e) => println!("{}: {}", "Calibration updated but not saved".yellow(), e),
    }
}

fn print_alert(payload: &EventPayload) {
    match payload {
        EventPayload::TrackingLost { timestamp } => {
            println!("{} tracking lost at t={}; audio unchanged", "⚠".yellow(), timestamp)
        }
        EventPayload::SessionFault { kind, message } => {
            println!("{} session fault ({}): {}", "⚠".red(), kind, message)
        }
        _ => {}
    }
}

fn print_outcome(sample: Option<GuidanceSample>) {
    match sample {
        Some(s) => println!(
            "  distance={:.3} elevation={:.3} bearing={:.3} → pitch={:.1} gain={:.3}",
            s.distance, s.elevation, s.bearing_offset, s.pitch, s.gain
        ),
        None => println!("  {}", "sample dropped (no target or degenerate geometry)".dimmed()),
    }
}

fn fmt_vec(v: Vec3) -> String {
    format!("({:.3}, {:.3}, {:.3})", v.x, v.y, v.z)
}
