use anyhow::{bail, Context};
use clap::Parser;
use dbgkernel::adapter::dap::DapAdapter;
use dbgkernel::adapter::LaunchConfig;
use dbgkernel::config::KernelConfig;
use dbgkernel::dialect::{Dialect, SessionIdentity, SwiftDialect};
use dbgkernel::iopub::JsonLinesIoPub;
use dbgkernel::relay::{block_interrupt_signal, InterruptRelay, SignalSource};
use dbgkernel::{frontend, Kernel, KernelSettings};
use itertools::Itertools;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: ~/.config/dbgk/kernel.toml)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Debug adapter executable, overrides the configured one
    #[clap(long)]
    adapter: Option<String>,

    /// REPL host program launched under the debug adapter
    #[clap(long, env = "REPL_PROGRAM_PATH")]
    program: Option<PathBuf>,

    /// Notebook session id (random if not set)
    #[clap(long)]
    session_id: Option<String>,

    /// Notebook session signing key
    #[clap(long, env = "DBGK_SESSION_KEY", default_value = "")]
    session_key: String,

    #[clap(long, env = "USER", default_value = "kernel")]
    username: String,

    /// Log file (no output to stdout, it carries the protocol)
    #[clap(long)]
    log_file: Option<PathBuf>,
}

/// Kernel environment without blocklisted variables, plus the kernel install directory.
fn target_env(blocklist: &[String], install_dir: &Path) -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .filter(|(key, _)| !blocklist.contains(key))
        .chain(std::iter::once((
            "DBGK_INSTALL_DIR".to_string(),
            install_dir.display().to_string(),
        )))
        .collect_vec()
}

fn main() -> anyhow::Result<()> {
    // SIGINT must be blocked before any thread is spawned, the interrupt relay waits for it
    block_interrupt_signal().context("block SIGINT")?;

    let args = Args::parse();
    let config = KernelConfig::from_file(args.config.as_deref());

    let log_file = args.log_file.clone().or_else(|| {
        config
            .as_ref()
            .and_then(|config| config.log.file.clone())
    });
    dbgkernel::log::init(log_file.as_deref()).context("init logging")?;

    let config = config.unwrap_or_else(|| {
        if args.config.is_some() {
            warn!(target: "kernel", "configuration file is not loaded, preset is used");
        }
        KernelConfig::default()
    });

    let dialect: Arc<dyn Dialect> = match config.target.language.as_str() {
        "swift" => Arc::new(SwiftDialect),
        other => bail!("unsupported target language `{other}`"),
    };

    let program = args
        .program
        .clone()
        .or_else(|| config.target.program.clone())
        .context("REPL program is not set, use --program or REPL_PROGRAM_PATH")?;

    let adapter_command = args
        .adapter
        .clone()
        .unwrap_or_else(|| config.adapter.command.clone());
    let adapter_path = which::which(&adapter_command)
        .with_context(|| format!("debug adapter `{adapter_command}` not found"))?;

    let exe = std::env::current_exe()
        .and_then(std::fs::canonicalize)
        .context("locate kernel executable")?;
    let install_dir = exe.parent().unwrap_or(Path::new("/"));

    let settings = KernelSettings {
        launch: LaunchConfig {
            program,
            args: vec![],
            env: target_env(&config.target.env_blocklist, install_dir),
            cwd: std::env::current_dir().ok(),
            entry_breakpoint: Some(config.target.entry_breakpoint.clone())
                .filter(|entry| !entry.is_empty()),
        },
        identity: SessionIdentity {
            id: args
                .session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            key: args.session_key.clone(),
            username: args.username.clone(),
        },
        include_roots: config.preprocessor.include_roots.clone(),
        relay: (&config.relay).into(),
        eval_timeout: config.evaluation.timeout(),
    };

    let adapter = DapAdapter::spawn(&adapter_path, &config.adapter.args)
        .with_context(|| format!("spawn debug adapter {}", adapter_path.display()))?;
    let out = Arc::new(JsonLinesIoPub::new(std::io::stdout()));

    let kernel = Kernel::start(Arc::new(adapter), out.clone(), dialect, settings)
        .context("start kernel")?;
    let _interrupts = InterruptRelay::spawn(kernel.session().clone(), SignalSource::new())
        .context("spawn interrupt relay")?;
    info!(target: "kernel", "serving requests");

    let served = frontend::serve(&kernel, std::io::stdin().lock(), &out);
    if let Err(e) = kernel.shutdown() {
        warn!(target: "kernel", "shutdown: {e:#}");
    }
    served.context("serve requests")?;
    Ok(())
}
