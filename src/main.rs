use gesture_harmony::bridge::GestureLoop;
use gesture_harmony::config::Config;
use gesture_harmony::console_display::ConsoleDisplay;
use gesture_harmony::gesture::HandTracker;
use gesture_harmony::harmony::HarmonyGenerator;
use gesture_harmony::landmark_reader::{LandmarkReader, ThreadedTracker};
use gesture_harmony::mapping::{CcSweep, MappingWizard};
use gesture_harmony::melody::Seed;
use gesture_harmony::output::{self, MidiTransport, NullTransport, OutputChannel, PortChoice};
use gesture_harmony::performer::{PerformanceConfig, Performer};
use gesture_harmony::session::Session;
use gesture_harmony::simulator::{ScaleWalk, SimulatedTracker};
use gesture_harmony::types::{cc_by_name, VizNote};
use gesture_harmony::ws_server::VizServer;

use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info, warn};
use std::fmt::Display;
use std::io::{self, Write};
use std::path::PathBuf;
use std::thread;

/// Frame rate of the built-in hand simulator.
const SIMULATED_FPS: f32 = 30.0;

#[derive(Parser)]
#[command(name = "gesture-harmony")]
#[command(about = "Real-time melody with cascaded harmony and hand-gesture effect control over MIDI")]
struct Cli {
    /// Trained note model (reported only; notes come from the built-in scale walk)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Seed sequence, a JSON array of [pitch, step, duration]
    #[arg(long)]
    seed: Option<PathBuf>,

    /// MIDI output port: index or part of its name
    #[arg(long)]
    port: Option<String>,

    /// Create the virtual output port without prompting
    #[arg(long)]
    virtual_port: bool,

    /// Run without a MIDI port (messages are discarded)
    #[arg(long)]
    dry_run: bool,

    /// List MIDI output ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Sampling temperature (higher = more random) [default: 2.0]
    #[arg(long)]
    temperature: Option<f64>,

    /// Melody note velocity 0-127 [default: 80]
    #[arg(long)]
    velocity: Option<u8>,

    /// Stop after this many notes (default: run until Ctrl+C)
    #[arg(long)]
    num_notes: Option<u64>,

    /// Shortest note duration in seconds [default: 0.1]
    #[arg(long)]
    min_duration: Option<f64>,

    /// Longest note duration in seconds [default: 2.0]
    #[arg(long)]
    max_duration: Option<f64>,

    /// Playback speed multiplier; 2.0 = half tempo [default: 1.0]
    #[arg(long)]
    speed: Option<f64>,

    /// Visualization WebSocket port [default: 8765]
    #[arg(long)]
    ws_port: Option<u16>,

    /// Visualization bind address [default: 0.0.0.0]
    #[arg(long)]
    ws_addr: Option<String>,

    /// HTML page served on the visualization port
    #[arg(long)]
    ws_page: Option<PathBuf>,

    /// Disable the visualization feed
    #[arg(long)]
    no_visualization: bool,

    /// Disable gesture control
    #[arg(long)]
    no_gesture: bool,

    /// Add a harmony voice under the melody
    #[arg(long)]
    polyphony: bool,

    /// Harmony style: classical, jazz or modern [default: classical]
    #[arg(long)]
    harmony_style: Option<String>,

    /// Hand landmarks as JSONL ("-" for stdin) instead of the simulated hand
    #[arg(long)]
    landmarks: Option<PathBuf>,

    /// Replay a landmark file at this frame rate
    #[arg(long)]
    landmark_fps: Option<f32>,

    /// Controller updates per second [default: 20]
    #[arg(long)]
    cc_rate: Option<u32>,

    /// Print a piano roll of the melody to the terminal
    #[arg(long)]
    console: bool,

    /// JSON config file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the merged configuration (file plus flags) to this path and exit
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Seed for the random generators (repeatable runs)
    #[arg(long)]
    rng_seed: Option<u64>,

    /// Sweep one controller for DAW MIDI-learn and exit:
    /// filter, resonance, reverb, chorus, modulation, or all for a wizard
    #[arg(long)]
    map_cc: Option<String>,

    /// Seconds per sweep with --map-cc
    #[arg(long, default_value_t = 3.0)]
    sweep_duration: f64,

    /// Number of sweeps with --map-cc
    #[arg(long, default_value_t = 2)]
    sweep_repetitions: u32,
}

fn fail(e: impl Display) -> ! {
    error!("{}", e);
    std::process::exit(1);
}

/// File values first, then any flag the user gave.
fn build_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).unwrap_or_else(|e| fail(e)),
        None => Config::default(),
    };

    let g = &mut config.generation;
    if let Some(v) = cli.temperature {
        g.temperature = v;
    }
    if let Some(v) = cli.velocity {
        g.velocity = v;
    }
    if cli.num_notes.is_some() {
        g.num_notes = cli.num_notes;
    }
    if let Some(v) = cli.min_duration {
        g.min_duration = v;
    }
    if let Some(v) = cli.max_duration {
        g.max_duration = v;
    }
    if let Some(v) = cli.speed {
        g.speed = v;
    }

    let h = &mut config.harmony;
    if cli.polyphony {
        h.enabled = true;
    }
    if let Some(style) = &cli.harmony_style {
        h.style = style.clone();
    }
    if cli.rng_seed.is_some() {
        h.rng_seed = cli.rng_seed;
    }

    if let Some(rate) = cli.cc_rate {
        config.gesture.rate_hz = rate;
    }

    let v = &mut config.visualization;
    if cli.no_visualization {
        v.enabled = false;
    }
    if let Some(port) = cli.ws_port {
        v.port = port;
    }
    if let Some(addr) = &cli.ws_addr {
        v.addr = addr.clone();
    }
    if cli.ws_page.is_some() {
        v.page = cli.ws_page.clone();
    }

    config
}

fn prompt_for_port(ports: &[String]) -> PortChoice {
    if ports.is_empty() {
        info!("No MIDI output ports found");
        return PortChoice::Virtual;
    }
    println!("Available MIDI ports:");
    for (i, name) in ports.iter().enumerate() {
        println!("  [{}] {}", i, name);
    }
    print!("\nSelect port number (or press Enter to create virtual): ");
    let _ = io::stdout().flush();

    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return PortChoice::Virtual;
    }
    match line.trim().parse::<usize>() {
        Ok(i) if i < ports.len() => PortChoice::Index(i),
        _ => PortChoice::Virtual,
    }
}

fn open_transport(cli: &Cli) -> Box<dyn MidiTransport> {
    if cli.dry_run {
        info!("MIDI: dry run, messages are discarded");
        return Box::new(NullTransport);
    }

    if let Some(port) = &cli.port {
        let choice = match port.parse::<usize>() {
            Ok(i) => PortChoice::Index(i),
            Err(_) => PortChoice::Named(port.clone()),
        };
        match output::connect(&choice) {
            Ok(t) => return t,
            Err(e) => warn!("MIDI: could not open port '{}': {}", port, e),
        }
    }

    let choice = if cli.virtual_port {
        PortChoice::Virtual
    } else {
        match output::list_output_ports() {
            Ok(ports) => prompt_for_port(&ports),
            Err(e) => fail(e),
        }
    };
    output::connect(&choice).unwrap_or_else(|e| fail(format!("{} (use --dry-run to run without MIDI)", e)))
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let cli = Cli::parse();

    if cli.list_ports {
        match output::list_output_ports() {
            Ok(ports) if ports.is_empty() => println!("No MIDI output ports found"),
            Ok(ports) => {
                for (i, name) in ports.iter().enumerate() {
                    println!("  [{}] {}", i, name);
                }
            }
            Err(e) => fail(e),
        }
        return;
    }

    let config = build_config(&cli);
    if let Err(e) = config.validate() {
        fail(e);
    }
    if let Some(path) = &cli.save_config {
        if let Err(e) = config.save(path) {
            fail(e);
        }
        return;
    }

    let session = Session::new(OutputChannel::new(open_transport(&cli)));
    {
        let shutdown = session.shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            info!("Stopping...");
            shutdown.trigger();
        }) {
            warn!("Could not install Ctrl+C handler: {}", e);
        }
    }

    // ─── CC mapping assistant ───────────────────────────────────────
    if let Some(name) = &cli.map_cc {
        let template = |cc: u8, label: &str| CcSweep {
            channel: config.gesture.channel,
            duration: cli.sweep_duration,
            repetitions: cli.sweep_repetitions,
            ..CcSweep::new(cc, label)
        };
        let result = if name.eq_ignore_ascii_case("all") {
            MappingWizard::new(io::stdin().lock(), io::stdout(), template(0, "wizard"))
                .run(&session)
                .map(|_| ())
        } else {
            let Some((cc, label)) = cc_by_name(name) else {
                fail(format!(
                    "unknown controller '{}' (expected filter, resonance, reverb, chorus, modulation or all)",
                    name
                ));
            };
            template(cc, label).run(&session).map(|_| ())
        };
        if let Err(e) = result {
            error!("{}", e);
        }
        // Leave the swept controllers parked for the DAW
        session.output.close_keeping_controllers();
        return;
    }

    let g = &config.generation;
    info!("═══════════════════════════════════════════════");
    info!("  GESTURE HARMONY v{}", env!("CARGO_PKG_VERSION"));
    info!("  MIDI: {}", session.output.port_name());
    info!("  Temperature: {}  Velocity: {}  Speed: {}x", g.temperature, g.velocity, g.speed);
    info!("  Duration: {}s - {}s", g.min_duration, g.max_duration);
    if config.harmony.enabled {
        info!("  Harmony: {} (channel {})", config.harmony.style, config.harmony_channel() + 1);
    }
    if config.visualization.enabled {
        info!("  Visualization: ws on {}", config.visualization.bind_addr());
    }
    if !cli.no_gesture {
        info!("  Gesture: {} Hz", config.gesture.rate_hz);
    }
    info!("═══════════════════════════════════════════════");

    if let Some(model) = &cli.model {
        warn!(
            "Model {} not loaded: notes come from the built-in scale walk",
            model.display()
        );
    }
    let seed = Seed::load_or_default(cli.seed.as_deref());

    let mut performer = Performer::new(
        Box::new(ScaleWalk::new(&seed, cli.rng_seed)),
        PerformanceConfig::from(&config),
        session.clone(),
    );
    if config.harmony.enabled {
        // Validated above
        let profile = config.harmony_profile().unwrap_or_else(|e| fail(e));
        performer = performer.with_harmony(HarmonyGenerator::new(
            profile,
            config.harmony.history,
            config.harmony.rng_seed,
        ));
    }

    let mut handles = Vec::new();

    // ─── Visualization server ───────────────────────────────────────
    if config.visualization.enabled {
        let (tx, rx) = bounded::<VizNote>(256);
        performer = performer.with_listener(tx);
        let server = VizServer::new(rx, config.visualization.bind_addr(), session.shutdown.clone())
            .with_page(config.visualization.page.clone());
        match thread::Builder::new().name("viz".into()).spawn(move || server.run()) {
            Ok(h) => handles.push(h),
            Err(e) => warn!("viz: could not start: {}", e),
        }
    }

    // ─── Console piano roll ─────────────────────────────────────────
    if cli.console {
        let (tx, rx) = bounded::<VizNote>(256);
        performer = performer.with_listener(tx);
        match thread::Builder::new()
            .name("display".into())
            .spawn(move || ConsoleDisplay::new(rx).run())
        {
            Ok(h) => handles.push(h),
            Err(e) => warn!("display: could not start: {}", e),
        }
    }

    // ─── Gesture control ────────────────────────────────────────────
    let mut gesture_handle = None;
    if !cli.no_gesture {
        let tracker: Option<Box<dyn HandTracker>> = match &cli.landmarks {
            // The reader thread may block on a silent pipe; the gesture loop
            // polls it so Ctrl+C is still seen.
            Some(path) => match LandmarkReader::open(path)
                .and_then(|r| ThreadedTracker::spawn(r.with_frame_rate(cli.landmark_fps)))
            {
                Ok(t) => Some(Box::new(t)),
                Err(e) => {
                    warn!("gesture: {}; continuing without gesture control", e);
                    None
                }
            },
            None => Some(Box::new(SimulatedTracker::new(SIMULATED_FPS))),
        };
        if let Some(tracker) = tracker {
            let gesture_loop = GestureLoop::new(tracker, &config.gesture, session.clone());
            match thread::Builder::new()
                .name("gesture".into())
                .spawn(move || gesture_loop.run())
            {
                Ok(h) => gesture_handle = Some(h),
                Err(e) => warn!("gesture: could not start: {}", e),
            }
        }
    }

    // ─── Melody (runs until done or Ctrl+C) ─────────────────────────
    info!("Press Ctrl+C to stop");
    let melody = thread::Builder::new()
        .name("melody".into())
        .spawn(move || performer.run());
    match melody {
        Ok(h) => {
            if h.join().is_err() {
                error!("Melody thread panicked");
            }
        }
        Err(e) => error!("Could not start melody thread: {}", e),
    }

    session.shutdown.trigger();
    if let Some(h) = gesture_handle {
        let _ = h.join();
    }
    session.output.close();
    for h in handles {
        let _ = h.join();
    }
    info!("Goodbye");
}
