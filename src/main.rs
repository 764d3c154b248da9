use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::BufReader;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, warn};

use saftbar::font::{FontResolver, FontSet, FontSpec};
use saftbar::markup::InputFormat;
use saftbar::platform::Edge;
use saftbar::platform::x11::X11WindowSystem;
use saftbar::{Bar, BarConfig, BarError, logging};

#[derive(Parser)]
#[command(version, about = "Status bar for X11 driven by lemonbar-style markup on stdin")]
struct Cli {
    /// Configuration file, instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dock the bar to the bottom edge
    #[arg(short, long)]
    bottom: bool,

    /// Bar height in pixels
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Font as `Family[:size=N][:offset=N]` or a file path; repeat for fallbacks
    #[arg(short, long = "font", value_name = "PATTERN")]
    fonts: Vec<FontSpec>,

    /// Window name and class
    #[arg(short, long)]
    name: Option<String>,

    /// Read JSON content instead of markup
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn apply(self, config: &mut BarConfig) {
        if self.bottom {
            config.position = Edge::Bottom;
        }
        if self.height.is_some() {
            config.height = self.height;
        }
        if !self.fonts.is_empty() {
            config.fonts = self.fonts;
        }
        if let Some(name) = self.name {
            config.name = name;
        }
        if self.json {
            config.input_format = InputFormat::Json;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let mut message = e.to_string();
            let mut source = e.source();
            while let Some(cause) = source {
                message.push_str(": ");
                message.push_str(&cause.to_string());
                source = cause.source();
            }
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BarError> {
    let mut config = match &cli.config {
        Some(path) => BarConfig::load_path(path)?,
        None => BarConfig::load()?,
    };
    cli.apply(&mut config);
    config.validate()?;

    let resolver = FontResolver::new(FontSet::load(&config.fonts)?);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(BarError::Runtime)?;

    runtime.block_on(async {
        let ws = X11WindowSystem::connect(&config.name)?;
        let mut bar = Bar::new(ws, resolver, &config);
        let input = BufReader::new(tokio::io::stdin());
        bar.run(input, tokio::io::stdout(), shutdown_signal()).await
    })
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
