use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use tsumiki::tasks::{self, Tools};
use tsumiki::{BuildConfig, Layout, Mode};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Command {
    /// Serve the output tree and rebuild on change.
    Dev,
    /// Build everything once.
    Build,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(value_enum, index = 1, default_value = "dev")]
    mode: Command,

    /// Project root holding `assets/`, `app/` and `bower.json`.
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Port of the HTTP server in dev mode.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Log filter, overrides TSUMIKI_LOG.
    #[arg(long)]
    log_level: Option<String>,

    /// Production build regardless of NODE_ENV.
    #[arg(long)]
    prod: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tsumiki::init_logging(args.log_level.as_deref());

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mode = match args.mode {
        Command::Build => Mode::Build,
        Command::Dev => Mode::Dev,
    };

    let mut config = BuildConfig::from_env(mode, Layout::new(&args.root));
    if args.prod {
        config.production = true;
    }

    tracing::info!(
        "{} build in {}",
        if config.production { "production" } else { "development" },
        config.layout.root
    );

    match mode {
        Mode::Build => {
            let orch = tasks::standard(Arc::new(config), Tools::esbuild())?;
            orch.run_default()?;
        }
        Mode::Dev => dev(config, args.port)?,
    }

    Ok(())
}

#[cfg(feature = "live")]
fn dev(config: BuildConfig, port: u16) -> anyhow::Result<()> {
    let live = Arc::new(tsumiki::server::LiveReload::start()?);
    let config = config.with_live(live.port());

    let mut orch = tasks::standard(Arc::new(config), Tools::esbuild())?.with_notifier(live);
    tasks::serve(&mut orch, Some(port))?;
    orch.run_default()?;

    Ok(())
}

#[cfg(not(feature = "live"))]
fn dev(config: BuildConfig, _port: u16) -> anyhow::Result<()> {
    tracing::warn!("built without the `live` feature, running a single build");
    let orch = tasks::standard(Arc::new(config), Tools::esbuild())?;
    orch.run_default()?;

    Ok(())
}
