use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::Receiver;
use disco_lights_core::{
    establish_session, list_input_devices, pair_new_user, AppConfig, CaptureLoop,
    CpalCaptureDevice, DiscoLightsError, FileSessionStore, HueBootstrap, HueClient, HueController,
    LightController, LightHandle, Profile,
};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_pairing_failure() => {
            tracing::error!("{err}, exiting...");
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!(%err, "exiting after failure");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> disco_lights_core::Result<()> {
    match cli.command {
        Commands::Run(args) => run_live(args.resolve()?),
        Commands::Pair(args) => run_pair(args.resolve()?),
        Commands::Lights(args) => run_list_lights(args.resolve()?),
        Commands::Devices => run_list_devices(),
        Commands::Config(args) => {
            let config = args.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_live(config: AppConfig) -> disco_lights_core::Result<()> {
    tracing::info!(profile = %config.profile.name, "starting live mode");
    let interrupt = install_interrupt_handler()?;

    let client = HueClient::new()?;
    let bootstrap = hue_bootstrap(&config, client.clone())?;
    let controller = HueController::new(client);
    let mut device = CpalCaptureDevice::new(config.audio.clone());

    let mut pipeline = CaptureLoop::new(config.profile.clone())?;
    pipeline.connect(&bootstrap, &controller, &config.bridge, &interrupt)?;
    if let Err(err) = pipeline.start(&mut device) {
        // lights were powered on while connecting
        if let Err(cleanup) = pipeline.stop() {
            tracing::warn!(%cleanup, "cleanup after failed start was incomplete");
        }
        return Err(err);
    }

    pipeline.run(&interrupt)
}

/// Commands without lights to restore keep the default Ctrl+C behaviour, so
/// a stalled bridge request can still be cut short.
fn run_pair(config: AppConfig) -> disco_lights_core::Result<()> {
    let interrupt = crossbeam_channel::never();
    let bootstrap = hue_bootstrap(&config, HueClient::new()?)?;

    let session = pair_new_user(
        &bootstrap,
        &config.bridge.address,
        config.bridge.pairing_wait(),
        &interrupt,
    )?;
    tracing::info!(bridge = %session.bridge_address, "paired with bridge");
    Ok(())
}

fn run_list_lights(config: AppConfig) -> disco_lights_core::Result<()> {
    let interrupt = crossbeam_channel::never();
    let client = HueClient::new()?;
    let bootstrap = hue_bootstrap(&config, client.clone())?;

    let session = establish_session(
        &bootstrap,
        &config.bridge.address,
        config.bridge.pairing_wait(),
        &interrupt,
    )?;
    for light in HueController::new(client).fetch_lights(&session)? {
        println!("{}\t{}\t{}", light.id(), light.name(), light.kind());
    }
    Ok(())
}

fn run_list_devices() -> disco_lights_core::Result<()> {
    for (index, name) in list_input_devices()?.into_iter().enumerate() {
        println!("{index}: {name}");
    }
    Ok(())
}

fn hue_bootstrap(config: &AppConfig, client: HueClient) -> disco_lights_core::Result<HueBootstrap> {
    let store = FileSessionStore::new(config.bridge.resolved_session_path()?);
    Ok(HueBootstrap::new(client, store, config.bridge.device_type.clone()))
}

/// Routes every Ctrl+C into a channel. The process is never killed from the
/// handler, so shutdown always runs to completion.
fn install_interrupt_handler() -> disco_lights_core::Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| DiscoLightsError::msg(format!("failed to install Ctrl+C handler: {err}")))?;
    Ok(rx)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Sound reactive lights for Hue bridges", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the lights from live audio until interrupted.
    Run(ConfigArgs),
    /// Pair with the bridge and store a fresh session.
    Pair(ConfigArgs),
    /// List the lights reachable through the bridge.
    Lights(ConfigArgs),
    /// List the available audio input devices.
    Devices,
    /// Print the effective configuration as JSON.
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Calibration preset; replaces the profile from the configuration file.
    #[arg(short, long, value_enum)]
    profile: Option<ProfileArg>,
    /// Network address of the bridge.
    #[arg(short, long)]
    bridge: Option<String>,
    /// Substring of the audio input device name.
    #[arg(short, long)]
    device: Option<String>,
    /// Where the bridge session is stored.
    #[arg(long)]
    session: Option<PathBuf>,
}

impl ConfigArgs {
    fn resolve(self) -> disco_lights_core::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };

        if let Some(profile) = self.profile {
            config.profile = profile.into();
        }
        if let Some(bridge) = self.bridge {
            config.bridge.address = bridge;
        }
        if let Some(device) = self.device {
            config.audio.device = Some(device);
        }
        if let Some(session) = self.session {
            config.bridge.session_path = Some(session);
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ProfileArg {
    /// Stereo, 100-sample smoothing, colorized four-band table.
    Fine,
    /// Mono, raw loudness, brightness-only two-band table.
    Coarse,
}

impl From<ProfileArg> for Profile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::Fine => Profile::fine(),
            ProfileArg::Coarse => Profile::coarse(),
        }
    }
}
