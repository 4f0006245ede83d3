use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use local_tts::engines::kokoro::KokoroProvider;
use local_tts::server::{self, AppState};
use local_tts::{device, Settings};

#[derive(Parser)]
#[command(name = "local-tts")]
#[command(about = "Local text-to-speech server with a /v1/audio/speech endpoint", long_about = None)]
struct Cli {
    /// Address to bind (overrides LOCAL_TTS_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides LOCAL_TTS_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Default model name (overrides LOCAL_TTS_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// Compute device: auto, cpu, cuda or mps (overrides LOCAL_TTS_DEVICE)
    #[arg(short, long)]
    device: Option<String>,

    /// Load the default model before accepting requests
    #[arg(long)]
    preload: bool,
}

impl Cli {
    fn apply(self, settings: &mut Settings) {
        if let Some(host) = self.host {
            settings.host = host;
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(model) = self.model {
            settings.model = model;
        }
        if let Some(device) = self.device {
            settings.device = device;
        }
        settings.preload |= self.preload;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = Settings::from_env().context("invalid LOCAL_TTS_* configuration")?;
    cli.apply(&mut settings);

    let provider = Arc::new(KokoroProvider::new(&settings.model_dir));
    log::info!(
        "Starting local-tts (model '{}', device '{}', models in {})",
        settings.model,
        settings.device,
        provider.model_dir().display()
    );
    let state = Arc::new(AppState::new(settings, provider, device::default_probe()));

    let startup_state = Arc::clone(&state);
    tokio::task::spawn_blocking(move || startup_state.startup())
        .await
        .context("startup task panicked")?
        .context("startup failed")?;

    server::serve(state)
        .await
        .context("server terminated with an error")?;
    Ok(())
}
