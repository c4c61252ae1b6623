//! Conductor CLI: serve the bundled demo controllers against an app folder.

mod controllers;

use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

use conductor::{App, ControllerRegistry, Settings};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
enum Command {
    /// Serve an application folder
    Serve {
        folder: String,
        port: Option<u16>,
        dev_mode: bool,
    },
    /// Print the route table
    Routes { folder: String },
    Help,
    Version,
}

fn print_usage() {
    eprintln!("Conductor {}", VERSION);
    eprintln!();
    eprintln!("Usage: conductor serve <folder> [--port PORT] [--dev]");
    eprintln!("       conductor routes <folder>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve <folder>   Start the HTTP server for an application folder");
    eprintln!("  routes <folder>  List the routes derived from the controllers");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --dev            Development mode (error details, template watching)");
    eprintln!("  --port PORT      Port to listen on (default: settings.yml or 3000)");
    eprintln!("  --help, -h       Show this help message");
    eprintln!("  --version, -V    Show version");
    eprintln!();
    eprintln!("Logging is controlled with RUST_LOG (default: info).");
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "--help" | "-h" | "help" => Ok(Command::Help),
        "--version" | "-V" => Ok(Command::Version),
        "routes" => {
            let folder = args.get(2).ok_or("routes requires a folder argument")?;
            Ok(Command::Routes {
                folder: folder.clone(),
            })
        }
        "serve" => {
            let folder = args
                .get(2)
                .filter(|a| !a.starts_with('-'))
                .ok_or("serve requires a folder argument")?
                .clone();
            let mut port: Option<u16> = None;
            let mut dev_mode = false;

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--port" => {
                        i += 1;
                        let value = args.get(i).ok_or("--port requires a port number")?;
                        port = Some(
                            value
                                .parse()
                                .map_err(|_| format!("Invalid port number: {}", value))?,
                        );
                    }
                    "--dev" => dev_mode = true,
                    other => return Err(format!("Unknown option for serve: {}", other)),
                }
                i += 1;
            }

            Ok(Command::Serve {
                folder,
                port,
                dev_mode,
            })
        }
        other => Err(format!("Unknown command: {}", other)),
    }
}

fn load_settings(folder: &str) -> conductor::Result<Settings> {
    let path = Path::new(folder);
    if !path.is_dir() {
        return Err(conductor::Error::Server(format!(
            "'{}' is not a directory",
            folder
        )));
    }
    Settings::load(path)
}

fn registry() -> conductor::Result<ControllerRegistry> {
    ControllerRegistry::from_controllers(controllers::all())
}

fn run(command: Command) -> conductor::Result<()> {
    match command {
        Command::Help => print_usage(),
        Command::Version => println!("conductor {}", VERSION),
        Command::Routes { folder } => {
            let app = App::new(load_settings(&folder)?, registry()?)?;
            for route in app.routes().routes() {
                println!(
                    "{:<8} {:<24} {}#{}",
                    route.method.as_str().to_uppercase(),
                    route.pattern,
                    route.info.controller,
                    route.info.action
                );
            }
        }
        Command::Serve {
            folder,
            port,
            dev_mode,
        } => {
            let mut settings = load_settings(&folder)?;
            if let Some(port) = port {
                settings.port = port;
            }
            if dev_mode {
                settings.dev_mode = true;
                settings.templates.watch = true;
            }

            let app = App::new(settings, registry()?)?.with_services(controllers::services());

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| conductor::Error::Server(format!("failed to start runtime: {}", e)))?;
            runtime.block_on(conductor::serve::serve(Arc::new(app)))?;
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("Error: {}", message);
            eprintln!();
            print_usage();
            process::exit(2);
        }
    };

    if let Err(e) = run(command) {
        tracing::error!(error = %e, "conductor failed");
        process::exit(1);
    }
}
