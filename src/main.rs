use clap::Parser;
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "voxtelop", about = "Transcription-to-telop synthesis service")]
struct Args {
    /// Port for the local HTTP API.
    #[arg(long, default_value_t = 8350)]
    port: u16,

    /// Settings file path. Defaults to settings.json in the platform config dir.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let settings_path = args
        .settings
        .unwrap_or_else(voxtelop_lib::settings::default_settings_path);
    info!("settings file: {}", settings_path.display());

    let state = voxtelop_lib::build_state(settings_path);
    state.resolve.start_monitor();

    let result = voxtelop_lib::server::serve(state.clone(), args.port).await;

    state.playback.shutdown();
    result
}
