use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use vigil::configuration::config::Config;
use vigil::controller::controller_handler::Controller;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(version)]
#[command(about = "Device fleet monitoring and recording supervisor")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(env = "VIGIL_CONFIG")]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() {
    // Default to info; RUST_LOG overrides.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    println!(
        "
██╗   ██╗██╗ ██████╗ ██╗██╗
██║   ██║██║██╔════╝ ██║██║
██║   ██║██║██║  ███╗██║██║
╚██╗ ██╔╝██║██║   ██║██║██║
 ╚████╔╝ ██║╚██████╔╝██║███████╗
  ╚═══╝  ╚═╝ ╚═════╝ ╚═╝╚══════╝
================================
  fleet monitor & recorder v{}
================================
",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();

    info!("Importing configuration from {}", args.config_file.display());
    let config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Configuration imported: {} seed devices, sweep every {}s",
        config.devices.len(),
        config.monitor.sweep_interval_secs
    );

    let controller = match Controller::new(config).await {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Controller stopped with an error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_required() {
        assert!(Args::try_parse_from(["vigil", "/etc/vigil.toml"]).is_ok());
        let args = Args::try_parse_from(["vigil", "site.toml"]).unwrap();
        assert_eq!(args.config_file, PathBuf::from("site.toml"));
    }
}
