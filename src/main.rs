use std::io::IsTerminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use pcfdev::backend;
use pcfdev::cli::{self, Cli};
use pcfdev::config;
use pcfdev::logging;
use pcfdev::paths;
use pcfdev::progress::{self, OutputMode};

#[tokio::main(flavor = "current_thread")]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::detect(cli.verbose, std::io::stderr().is_terminal());

    // Tracing to stderr would tear through the spinner, so it is off while
    // one is drawn.
    let terminal_filter = if cli.verbose {
        EnvFilter::new("pcfdev=debug")
    } else if mode.draws_spinner(cli.command.progress_label().is_some()) {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pcfdev=warn"))
    };

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter);

    // File layer: always captures pcfdev=debug once the home directory is known
    let (file_writer, file_handle) = logging::DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("pcfdev=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    let config = config::load_config(cli.config.as_deref())?;

    // Activate file logging for commands that change the VM
    if cli.command.progress_label().is_some() {
        let log_path = paths::logs_dir(&config.home).join(logging::LOG_FILE);
        if let Err(e) = file_handle.set_file(&log_path) {
            tracing::warn!(path = %log_path.display(), "file logging disabled: {e}");
        }
    }

    let vbox = backend::create_backend(config);
    let message = match cli.command.progress_label() {
        Some(label) => progress::with_spinner(label, mode, cli::dispatch(&vbox, &cli.command)).await,
        None => cli::dispatch(&vbox, &cli.command).await,
    }?;

    println!("{message}");
    Ok(())
}
