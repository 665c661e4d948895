use crossterm::{cursor::Show, execute};
use std::{
    error::Error,
    io::{self, IsTerminal, Write},
    process::ExitCode,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use relayctl::{
    cli::{Cli, Commands, parse_args},
    host::{NativeHost, StreamTerminator, SystemHost},
    logs,
    service::{self, ServiceManager, native_manager},
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("relayctl: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<(), Box<dyn Error>> {
    let elevated = NativeHost::new().is_elevated();
    let config = args.manager_config(elevated)?;
    debug!("resolved configuration: {config:?}");
    let manager = native_manager(config.clone());

    match &args.command {
        Commands::Install { .. } => {
            let spec = args
                .install_spec(&config)
                .ok_or("install options missing")?;
            manager.install(&spec)?;
            println!("Service '{}' installed.", config.service_name);
            println!("Run 'relayctl start' to start it.");
        }
        Commands::Uninstall => {
            manager.uninstall()?;
            println!("Service '{}' uninstalled.", config.service_name);
        }
        Commands::Start => {
            manager.start()?;
            println!("Service '{}' is running.", config.service_name);
        }
        Commands::Stop => {
            manager.stop()?;
            println!("Service '{}' stopped.", config.service_name);
        }
        Commands::Status { follow: false } => {
            let snapshot = manager.status()?;
            print!("{}", snapshot.report("relayctl", io::stdout().is_terminal()));
        }
        Commands::Status { follow: true } => {
            let source = manager.open_follow()?;
            register_signal_handler(source.stream.terminator())?;
            let mut stdout = io::stdout();
            let interactive = stdout.is_terminal();
            service::follow(source, &mut stdout, interactive)?;
            info!("log stream closed");
        }
        Commands::Logs => {
            let stream = manager.open_logs()?;
            register_signal_handler(stream.terminator())?;
            logs::pump(stream, &mut io::stdout())?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level() {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Kills the log follower, restores the cursor, and exits cleanly on Ctrl-C or
/// SIGTERM.
fn register_signal_handler(follower: Option<StreamTerminator>) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        if let Some(follower) = &follower {
            follower.terminate();
        }
        let mut stdout = io::stdout();
        let _ = execute!(stdout, Show);
        let _ = writeln!(stdout);
        std::process::exit(0);
    })?;

    Ok(())
}
