use anyhow::{Context, Result, bail};
use clap::Parser;
use classify_core::{
    ClassificationService, ConsumerContext, Delivery, Image, InferenceExecutor, PipelineConfig,
};
use console::ConsoleOwner;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::{Duration, Instant};

mod console;

/// Classify one image with a pretrained model.
#[derive(Debug, Parser)]
#[command(name = "classify", version = env!("CLASSIFY_VERSION"))]
struct Cli {
    /// Image to classify.
    image: PathBuf,
    /// Pipeline configuration (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print the outcome as JSON.
    #[arg(long)]
    json: bool,
    /// Seconds to wait for the result.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("classify stopped with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the image was classified successfully.
fn run(cli: &Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    tracing::info!("classify {}", env!("CLASSIFY_VERSION"));

    // This thread is the consumer context: every owner call happens here.
    let (mut ctx, dispatcher) = ConsumerContext::new();
    let console = Rc::new(ConsoleOwner::new(std::io::stdout(), cli.json));
    let owner = ctx.register(&console);
    let executor = InferenceExecutor::new(&config.executor, dispatcher)
        .context("starting inference workers")?;

    let service = match ClassificationService::from_config(&config.model, executor, owner) {
        Ok(service) => service,
        Err(e) => {
            ctx.drain();
            return Err(e).context("model could not be loaded");
        }
    };

    let image = Image::open(&cli.image)
        .with_context(|| format!("could not open image {}", cli.image.display()))?;
    let handle = service.submit(owner, image);

    let deadline = Instant::now() + Duration::from_secs(cli.timeout);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match ctx.process_next(remaining) {
            Some(Delivery::Started { .. }) => continue,
            Some(delivery) if delivery.request() == Some(handle.id()) => break,
            Some(_) => continue,
            None if console.is_busy() => {
                bail!("{} still running after {}s", handle.id(), cli.timeout)
            }
            None => bail!("no result for {} within {}s", handle.id(), cli.timeout),
        }
    }

    Ok(console
        .last_outcome()
        .is_some_and(|outcome| outcome.is_success()))
}
