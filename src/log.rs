use crate::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Once;

pub static LOGGER_ONCE: Once = Once::new();

/// Install the global logger (configured with `RUST_LOG`).
///
/// Records go to `file` if given, otherwise to stderr. Stdout is never used for logs,
/// it carries the front-end protocol.
pub fn init(file: Option<&Path>) -> Result<(), Error> {
    let file = match file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };

    LOGGER_ONCE.call_once(|| {
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        match file {
            Some(file) => builder.target(env_logger::Target::Pipe(Box::new(file))),
            None => builder.target(env_logger::Target::Stderr),
        };
        _ = builder.try_init();
    });
    Ok(())
}
