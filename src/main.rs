use std::env;

use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:\n  searchbot serve --config <path>\n  searchbot verify-audit --path <file>";

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    let rest: Vec<String> = args.collect();

    match cmd.as_str() {
        "serve" => serve(flag(&rest, "--config").unwrap_or("./config/example-config.yaml")).await,
        "verify-audit" => {
            let Some(path) = flag(&rest, "--path") else {
                eprintln!("{USAGE}");
                std::process::exit(2);
            };
            match searchbot_server::verify_audit_chain(path) {
                Ok(summary) => println!("{summary}"),
                Err(e) => {
                    eprintln!("audit verification failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

async fn serve(config_path: &str) {
    let cfg = match searchbot_config::load_and_validate(config_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&cfg.logging);

    tokio::select! {
        result = searchbot_server::serve(cfg) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "server exited with error");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }
}

/// RUST_LOG wins over the configured level when set.
fn init_logging(logging: &searchbot_config::Logging) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}
