use anyhow::Context;
use clap::Parser;
use pipeline_cli::{CliArgs, builtin_steps, run_steps};
use pipeline_runtime::ShutdownFlag;

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _ = dotenvy::dotenv();

    let mut config = pipeline_config::load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
        config.validate().context("--threads")?;
    }

    pipeline_observability::init(&config.logging)?;

    let shutdown = ShutdownFlag::new();
    shutdown
        .register_signals()
        .context("failed to install signal handlers")?;

    let steps = builtin_steps(&config);
    let summaries = run_steps(&config, &steps, &args, &shutdown)?;
    tracing::info!(steps = summaries.len(), "pipeline finished");

    Ok(())
}
