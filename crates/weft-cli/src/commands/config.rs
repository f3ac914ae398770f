//! `weft config`: print the effective configuration.

use crate::settings::Settings;

pub fn execute(settings: &Settings) -> anyhow::Result<()> {
    print!("{}", settings.to_toml_string()?);
    Ok(())
}
