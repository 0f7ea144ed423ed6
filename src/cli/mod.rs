//! CLI mode for offline-shim.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::{
    AppConfig, CacheStorage, CacheStore, DiskCacheStorage, Error, HttpNetwork, Network, OfflineWorker, Request,
    ResponseSource, Result, WorkerHost,
};

/// A parsed CLI command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the install event.
    Install,
    /// Fetch each target through the worker.
    Fetch(Vec<String>),
    /// Run the local proxy.
    Serve {
        /// Bind address override.
        host: Option<String>,
        /// Port override.
        port: Option<u16>,
    },
    /// List cache stores and their entries.
    Caches,
    /// Delete a cache store.
    Delete(String),
    /// Show usage.
    Help,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    /// Explicit config file path.
    pub config: Option<PathBuf>,
    /// Command to run.
    pub command: Command,
}

/// Prints usage to stderr.
pub fn print_usage() {
    eprintln!("Usage: offline-shim [--config PATH] <COMMAND>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install                 Pre-cache the asset manifest");
    eprintln!("  fetch <path|url>...     Fetch through the cache, body to stdout");
    eprintln!("  serve [--host H] [--port P]");
    eprintln!("                          Run the local cache-first proxy");
    eprintln!("  caches                  List cache stores and their entries");
    eprintln!("  delete <name>           Delete a cache store");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>     Config file (default: $OFFLINE_SHIM_CONFIG or");
    eprintln!("                          <config dir>/offline-shim/config.toml)");
    eprintln!("  -h, --help              Show this help");
}

fn usage_error(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

/// Parses CLI arguments (without the program name).
///
/// # Errors
///
/// Returns [`Error::Config`] describing the first usage problem.
pub fn parse_args(args: &[String]) -> Result<Args> {
    let mut config = None;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                let path = args
                    .get(i)
                    .ok_or_else(|| usage_error("--config requires a value"))?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                return Ok(Args {
                    config,
                    command: Command::Help,
                });
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let Some((name, params)) = rest.split_first() else {
        return Ok(Args {
            config,
            command: Command::Help,
        });
    };

    let command = match name.as_str() {
        "install" => Command::Install,
        "caches" => Command::Caches,
        "fetch" => {
            if params.is_empty() {
                return Err(usage_error("fetch requires at least one path or URL"));
            }
            Command::Fetch(params.to_vec())
        }
        "delete" => match params {
            [cache] => Command::Delete(cache.clone()),
            _ => return Err(usage_error("delete requires exactly one cache name")),
        },
        "serve" => parse_serve(params)?,
        other => return Err(usage_error(format!("unknown command: {other}"))),
    };

    Ok(Args { config, command })
}

fn parse_serve(params: &[String]) -> Result<Command> {
    let mut host = None;
    let mut port = None;
    let mut i = 0;
    while i < params.len() {
        match params[i].as_str() {
            "--host" => {
                i += 1;
                host = Some(
                    params
                        .get(i)
                        .ok_or_else(|| usage_error("--host requires a value"))?
                        .clone(),
                );
            }
            "--port" => {
                i += 1;
                let value = params
                    .get(i)
                    .ok_or_else(|| usage_error("--port requires a value"))?;
                port = Some(
                    value
                        .parse()
                        .map_err(|_| usage_error(format!("invalid port: {value}")))?,
                );
            }
            other => return Err(usage_error(format!("unexpected serve argument: {other}"))),
        }
        i += 1;
    }
    Ok(Command::Serve { host, port })
}

/// Everything a command needs, built from the configuration.
struct Context {
    config: AppConfig,
    storage: Arc<DiskCacheStorage>,
    host: Arc<WorkerHost<OfflineWorker>>,
}

impl Context {
    fn new(config: AppConfig) -> Result<Self> {
        let storage = Arc::new(DiskCacheStorage::new(config.storage.dir.clone()));
        let network: Arc<dyn Network> = Arc::new(HttpNetwork::new(&config.network)?);
        let worker = OfflineWorker::new(
            config.cache.clone(),
            Arc::clone(&storage) as Arc<dyn CacheStorage>,
            Arc::clone(&network),
        );
        let host = Arc::new(WorkerHost::new(worker, network));
        Ok(Self {
            config,
            storage,
            host,
        })
    }

    /// Installs, or keeps controlling with a cache left by an earlier install.
    async fn install_or_adopt(&self) -> Result<()> {
        match self.host.install().await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self
                    .host
                    .adopt_existing(self.storage.as_ref(), &self.config.cache.name)
                    .await?
                {
                    log::warn!("Install failed, serving from existing cache: {e}");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }
}

/// Runs a parsed command.
///
/// # Errors
///
/// Returns the command's failure; the binary turns it into a non-zero exit.
pub async fn run(args: Args) -> Result<()> {
    if args.command == Command::Help {
        print_usage();
        return Ok(());
    }

    let config_path = args.config.unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_create(&config_path)?;
    log::debug!("Loaded config from {}", config_path.display());
    let ctx = Context::new(config)?;

    match args.command {
        Command::Install => {
            ctx.host.install().await?;
            println!(
                "Installed {} ({} assets) into {}",
                ctx.config.cache.name,
                ctx.config.cache.assets.len(),
                ctx.storage.root().display()
            );
            Ok(())
        }
        Command::Fetch(targets) => fetch(&ctx, &targets).await,
        Command::Serve { host, port } => serve(&ctx, host, port).await,
        Command::Caches => list_caches(&ctx).await,
        Command::Delete(name) => {
            if ctx.storage.delete(&name).await? {
                println!("Deleted {name}");
            } else {
                println!("No cache named {name}");
            }
            Ok(())
        }
        Command::Help => Ok(()),
    }
}

async fn fetch(ctx: &Context, targets: &[String]) -> Result<()> {
    ctx.install_or_adopt().await?;
    let origin = ctx.config.cache.origin_url()?;
    let mut stdout = tokio::io::stdout();
    let mut first_error = None;

    for target in targets {
        let result = match Request::get_path(&origin, target) {
            Ok(request) => ctx.host.fetch(request).await,
            Err(e) => Err(e),
        };
        match result {
            Ok((response, source)) => {
                let source = match source {
                    ResponseSource::Worker => "worker",
                    ResponseSource::Network => "network",
                };
                eprintln!("{} {source} {target}", response.status.as_u16());
                stdout.write_all(&response.body).await?;
            }
            Err(e) => {
                log::error!("Fetch failed: {target}: {e}");
                first_error.get_or_insert(e);
            }
        }
    }
    stdout.flush().await?;

    first_error.map_or(Ok(()), Err)
}

#[cfg(feature = "proxy")]
async fn serve(ctx: &Context, host: Option<String>, port: Option<u16>) -> Result<()> {
    ctx.install_or_adopt().await?;
    let host = host.unwrap_or_else(|| ctx.config.proxy.host.clone());
    let port = port.unwrap_or(ctx.config.proxy.port);
    let origin = ctx.config.cache.origin_url()?;

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT");
        }
    };
    crate::proxy::serve(Arc::clone(&ctx.host), origin, &host, port, shutdown).await
}

#[cfg(not(feature = "proxy"))]
async fn serve(_ctx: &Context, _host: Option<String>, _port: Option<u16>) -> Result<()> {
    Err(Error::Config("proxy support not compiled in".to_string()))
}

async fn list_caches(ctx: &Context) -> Result<()> {
    let names = ctx.storage.keys().await?;
    if names.is_empty() {
        println!("No caches in {}", ctx.storage.root().display());
        return Ok(());
    }
    for name in names {
        let store = ctx.storage.open(&name).await?;
        let keys = store.keys().await?;
        println!("{name} ({} entries)", keys.len());
        for request in keys {
            println!("  {request}");
        }
    }
    Ok(())
}
