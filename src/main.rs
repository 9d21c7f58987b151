use anyhow::{Context, Result};
use edclient::config::{self, Environment, Options, SessionConfig};
use edclient::connect::{self, EmacsDaemon, Established, SystemConnector};
use edclient::error::{ClientError, EXIT_FAILURE};
use edclient::session::{self, SystemPlatform};
use edclient::terminal::TerminalControl;
use edclient::{fallback, logging};
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

fn main() -> Result<()> {
    logging::init();

    let mut args = env::args_os();
    let progname = args
        .next()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| "edclient".to_string());

    let options = match Options::parse(args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}: {}", progname, e);
            eprintln!("Try '{} --help' for more information", progname);
            process::exit(EXIT_FAILURE);
        }
    };

    if options.show_version {
        writeln!(io::stdout(), "edclient {}", env!("CARGO_PKG_VERSION")).context("failed to print version")?;
        return Ok(());
    }
    if options.show_help {
        io::stdout()
            .write_all(config::usage(&progname).as_bytes())
            .context("failed to print usage")?;
        return Ok(());
    }
    if options.items.is_empty() && !options.eval && !options.create_frame {
        eprintln!("{}: file name or argument required", progname);
        eprintln!("Try '{} --help' for more information", progname);
        process::exit(EXIT_FAILURE);
    }

    let cwd = env::current_dir();
    let working_dir = cwd.as_ref().cloned().unwrap_or_else(|_| PathBuf::from("/"));
    let config = match SessionConfig::resolve(progname.clone(), options, Environment::capture(), working_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", progname, e);
            process::exit(EXIT_FAILURE);
        }
    };
    tracing::debug!(?config.socket_name, ?config.server_file, tty = config.tty, "resolved configuration");

    if config.tty {
        if let Err(e) = TerminalControl::new().wait_for_foreground() {
            tracing::debug!(error = %e, "could not stop background group");
        }
    }

    let mut connector = SystemConnector::new(&config, io::stderr());
    let mut conn = match connect::establish(&config, &mut connector, &mut EmacsDaemon, &mut io::stderr()) {
        Ok(Established::Connected(conn)) => conn,
        Ok(Established::Unavailable) => fail(&config, None),
        Err(e) => fail(&config, Some(e)),
    };

    if let Err(e) = cwd {
        fail(&config, Some(ClientError::WorkingDirectory(e)));
    }

    let mut platform = SystemPlatform::new();
    let outcome = session::run(
        &config,
        &mut conn,
        &mut platform,
        io::stdin().lock(),
        io::stdout().lock(),
        io::stderr(),
    );
    match outcome {
        Ok(outcome) => process::exit(outcome.exit_code()),
        Err(e) => fail(&config, Some(e)),
    }
}

/// Report `err`, hand off to the alternate editor if there is one, and exit
fn fail(config: &SessionConfig, err: Option<ClientError>) -> ! {
    let code = err.as_ref().map_or(EXIT_FAILURE, ClientError::exit_code);
    if let Some(err) = err {
        eprintln!("{}: {}", config.progname, err);
    }
    if config.alternate_editor.as_deref().is_some_and(|editor| !editor.is_empty()) {
        let err = fallback::exec_alternate(config);
        eprintln!("{}: {}", config.progname, err);
    }
    process::exit(code);
}
