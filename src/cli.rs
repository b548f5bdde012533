use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::{Config, ConfigError};

#[derive(Parser)]
#[command(name = "magpie")]
#[command(about = "Preservation worker: queue, AIP bundle assembly, Swift deposit", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Path to a JSON config file.
    #[arg(short = 'C', long, global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Directory bundles are assembled in.
    #[arg(short = 'W', long, global = true)]
    pub(crate) workdir: Option<PathBuf>,

    /// Directory preservation event logs are written to.
    #[arg(short = 'L', long, global = true)]
    pub(crate) logdir: Option<PathBuf>,

    /// Verbose logging.
    #[arg(short = 'D', long, global = true)]
    pub(crate) debug: bool,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Poll the preservation queue until shut down.
    Run,

    /// Preserve one entity immediately, bypassing the queue.
    Preserve {
        uuid: String,
        /// Entity type recorded alongside the uuid.
        #[arg(long, default_value = "items")]
        entity_type: String,
    },
}

impl Cli {
    /// File and environment layers first, then the CLI flags on top.
    pub(crate) fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(workdir) = &self.workdir {
            config.workdir = workdir.clone();
        }
        if let Some(logdir) = &self.logdir {
            config.logdir = logdir.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_layers() {
        let cli = Cli::parse_from([
            "magpie",
            "--workdir",
            "/srv/work",
            "--logdir",
            "/srv/log",
            "run",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.workdir, PathBuf::from("/srv/work"));
        assert_eq!(config.logdir, PathBuf::from("/srv/log"));
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn preserve_takes_a_uuid_and_default_type() {
        let cli = Cli::parse_from(["magpie", "preserve", "noid1"]);
        let Command::Preserve { uuid, entity_type } = cli.command else {
            panic!("expected preserve");
        };
        assert_eq!(uuid, "noid1");
        assert_eq!(entity_type, "items");
    }
}
