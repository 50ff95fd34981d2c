use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, trace};

use objrecycle_rs::config::Config;
use objrecycle_rs::{
    CLIArgs, create_deletion_cancellation_token, create_s3_client, exit_code_from_error,
    is_cancelled_error, run_operation,
};

mod ctrl_c_handler;
mod tracing_init;

/// objrecycle - object storage access tool for the stale data recycler.
///
/// This binary is a thin wrapper over the objrecycle-rs library.
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    if let Err(e) = run(config).await {
        if is_cancelled_error(&e) {
            debug!("operation cancelled by user.");
            return Ok(());
        }
        error!("{:#}", e);
        std::process::exit(exit_code_from_error(&e));
    }

    Ok(())
}

fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

async fn run(config: Config) -> Result<()> {
    let cancellation_token = create_deletion_cancellation_token();
    ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

    let start_time = tokio::time::Instant::now();
    debug!("objrecycle start.");

    let client = create_s3_client(&config.client_config, config.options, cancellation_token).await;
    run_operation(client.as_ref(), &config, &mut std::io::stdout()).await?;

    let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());
    debug!(duration_sec = duration_sec, "objrecycle has been completed.");

    Ok(())
}
