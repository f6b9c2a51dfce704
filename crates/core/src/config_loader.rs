//! Layered configuration loading.
//!
//! Sources, weakest first: `AppConfig::default()`, `config/Config.toml`,
//! an optional profile overlay `config/Config.{profile}.toml`, then
//! `DESK_`-prefixed environment variables (`__` separates nesting, e.g.
//! `DESK_BROKER__API_KEY`). `config/Config.json` is joined last for values
//! nothing else supplied. Defaults sit underneath so a bare checkout loads.

use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};

use crate::config::AppConfig;

const ENV_PREFIX: &str = "DESK_";

fn base() -> Figment {
    Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file("config/Config.toml"))
}

fn extract(figment: Figment) -> Result<AppConfig> {
    let config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .join(Json::file("config/Config.json"))
        .extract()?;
    Ok(config)
}

/// Load the desk configuration.
///
/// # Errors
///
/// Returns an error if a source cannot be read or the merged result does
/// not fit `AppConfig`.
pub fn load() -> Result<AppConfig> {
    extract(base())
}

/// Load with a profile overlay (`config/Config.{profile}.toml`).
///
/// # Errors
///
/// Returns an error if a source cannot be read or the merged result does
/// not fit `AppConfig`.
pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
    extract(base().merge(Toml::file(format!("config/Config.{profile}.toml"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_source() {
        figment::Jail::expect_with(|_| {
            let config = load().expect("defaults extract");
            assert_eq!(config.database.max_connections, 10);
            assert_eq!(config.broker.api_url, "https://api.kite.trade");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_the_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [database]
                url = "postgresql://db/desk"
                max_connections = 4

                [broker]
                api_key = "filekey"
                "#,
            )?;
            jail.set_env("DESK_BROKER__API_KEY", "envkey");

            let config = load().expect("merged extract");
            assert_eq!(config.database.url, "postgresql://db/desk");
            assert_eq!(config.database.max_connections, 4);
            assert_eq!(config.broker.api_key, "envkey");
            Ok(())
        });
    }

    #[test]
    fn profile_overlay_wins_over_the_base_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/Config.toml", "[database]\nmax_connections = 4\n")?;
            jail.create_file("config/Config.paper.toml", "[database]\nmax_connections = 2\n")?;

            let config = load_with_profile("paper").expect("profile extract");
            assert_eq!(config.database.max_connections, 2);
            Ok(())
        });
    }
}
