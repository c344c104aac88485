mod cli;
mod error;
mod input;
mod logging;
mod script;
mod simulate;

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use steadycast_engine::sim::{ScriptedEngine, VirtualSink};
use steadycast_engine::{
    ChannelRequest, DescriptorSource, HttpDescriptorSource, PlayerConfig, PlayerDriver,
    PlayerError, StaticDescriptorSource, StreamDescriptor,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    cli::Args,
    error::{AppError, Result},
    simulate::Simulation,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let _log_guard = logging::init_logging(args.log_level.as_deref(), args.log_dir.as_deref())?;

    let config = match &args.config {
        Some(path) => PlayerConfig::from_json_file(path)?,
        None => PlayerConfig::default(),
    };
    if !args.duration.is_finite() || args.duration <= 0.0 {
        return Err(AppError::InvalidInput(format!(
            "duration must be positive, got {}",
            args.duration
        )));
    }

    let engine = ScriptedEngine::new()
        .with_supported(!args.native)
        .with_auto_manifest(true);
    let remote = engine.remote();
    let mut sink = VirtualSink::new().with_native_hls(args.native);
    if args.autoplay_blocked {
        sink = sink.with_autoplay_blocked();
    }

    let source: Arc<dyn DescriptorSource> = match &args.source {
        Some(endpoint) => Arc::new(HttpDescriptorSource::new(endpoint)?),
        None => Arc::new(StaticDescriptorSource::new().with_demo_channel()),
    };

    let (driver, handle) = PlayerDriver::new(config, engine, sink.clone())?;
    let driver_task = tokio::spawn(driver.with_source(source).run());

    let token = CancellationToken::new();
    let printer = tokio::spawn(simulate::print_states(
        handle.clone(),
        token.clone(),
        args.interactive,
    ));

    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted. Shutting down gracefully...");
            signal_token.cancel();
        }
    });

    let opened = match &args.descriptor {
        Some(raw) => match load_descriptor(raw) {
            Ok(descriptor) => handle.start(descriptor).await.map_err(AppError::from),
            Err(e) => Err(e),
        },
        None => {
            let mut request = ChannelRequest::new(&args.channel);
            if let Some(event_id) = args.event_id {
                request = request.with_event(event_id);
            }
            info!("Opening channel {}", request.channel_id);
            handle.open(request).await.map_err(AppError::from)
        }
    };

    if opened.is_ok() {
        if !args.faults.is_empty() {
            info!("{} scripted faults scheduled", args.faults.faults().len());
        }
        let input_task = args.interactive.then(|| {
            let handle = handle.clone();
            let token = token.clone();
            tokio::task::spawn_blocking(move || input::input_handler(handle, token))
        });

        Simulation::new(
            handle.clone(),
            remote,
            sink,
            args.faults,
            Duration::from_secs_f64(args.duration),
        )
        .run(token.clone())
        .await;

        handle.stop().await?;
        token.cancel();
        if let Some(task) = input_task {
            task.await?;
        }
    }

    token.cancel();
    handle.shutdown();
    driver_task.await?;
    printer.await?;
    opened
}

/// Parses a descriptor given inline (`{...}`) or as a file path.
fn load_descriptor(raw: &str) -> Result<StreamDescriptor> {
    let text = if raw.trim_start().starts_with('{') {
        raw.to_string()
    } else {
        std::fs::read_to_string(Path::new(raw))?
    };
    let descriptor: StreamDescriptor = serde_json::from_str(&text).map_err(PlayerError::from)?;
    descriptor.validate()?;
    Ok(descriptor)
}
