use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use brain_tumor_rs::{Args, InferenceEngine, OnnxModel, Provisioner, ProvisionerConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let provisioner = Provisioner::new(ProvisionerConfig::from_args(&args));

    if args.provision_only {
        let paths = provisioner
            .ensure_artifacts()
            .context("provisioning model artifacts")?;
        println!("model:   {}", paths.model.display());
        println!("weights: {}", paths.weights.display());
        return Ok(());
    }

    let mut model = OnnxModel::new(args.cuda);
    if let Some(secs) = args.run_timeout_secs {
        model = model.with_run_timeout(Duration::from_secs(secs));
    }
    let engine = InferenceEngine::new(provisioner, model);
    let source = args
        .source
        .as_deref()
        .context("--source is required unless --provision-only is given")?;
    let label = engine
        .classify_file(source)
        .with_context(|| format!("classifying {}", source.display()))?;
    println!("The model predicts: {label}");
    Ok(())
}
