mod config;
mod process;
mod serve;
mod signals;

use clap::Parser;
use std::path::PathBuf;

/// A small HTTP control plane for one worker process: start it, stop it
/// (with everything it spawned), and clear its log.
#[derive(Parser, Debug)]
#[command(name = "counter-control", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "counter-control.toml")]
    config: PathBuf,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Worker command (overrides config; the default ./counter.py is not bundled)
    #[arg(short, long)]
    worker: Option<String>,

    /// Print the resolved config and exit
    #[arg(long)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut config::ControlConfig) {
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(bind) = &self.bind {
            cfg.server.bind = bind.clone();
        }
        if let Some(worker) = &self.worker {
            cfg.worker.command = worker.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "counter_control=debug"
    } else {
        "counter_control=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut cfg = config::load_config(&cli.config);
    cli.apply_overrides(&mut cfg);

    if cli.dry_run {
        match toml::to_string_pretty(&cfg) {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => {
                eprintln!("failed to render config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = serve::run(&cfg).await {
        tracing::error!("counter-control failed: {e}");
        std::process::exit(1);
    }
    tracing::info!("counter-control stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["counter-control"]);
        assert_eq!(cli.config, PathBuf::from("counter-control.toml"));
        assert!(cli.port.is_none());
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "counter-control",
            "--port",
            "8000",
            "--bind",
            "127.0.0.1",
            "--worker",
            "/opt/counter/counter.py",
        ]);
        let mut cfg = config::ControlConfig::default();
        cli.apply_overrides(&mut cfg);

        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.worker.command, "/opt/counter/counter.py");
        assert_eq!(cfg.worker.args, vec!["--start", "{start}"]);
    }

    #[test]
    fn test_cli_no_overrides_keeps_config() {
        let cli = Cli::parse_from(["counter-control", "-c", "other.toml"]);
        let mut cfg = config::ControlConfig::default();
        cfg.server.port = 9999;
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
    }
}
