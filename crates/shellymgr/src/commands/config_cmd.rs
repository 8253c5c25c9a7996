//! `config show` / `config init`: these run before any services exist.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match &args.command {
        ConfigCommand::Show => {
            let config = shellymgr_config::load(global.config.as_deref())?;
            println!("{}", output::render_one(global.output, &config));
            Ok(())
        }
        ConfigCommand::Init { force } => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(shellymgr_config::default_config_path);
            if path.exists() && !force {
                return Err(CliError::Usage(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(shellymgr_config::ConfigError::Io)?;
            }
            std::fs::write(&path, shellymgr_config::default_toml()?)
                .map_err(shellymgr_config::ConfigError::Io)?;
            println!("{}", output::success(&format!("wrote {}", path.display())));
            Ok(())
        }
    }
}
