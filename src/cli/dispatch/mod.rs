//! Map parsed arguments to the action the binary runs.

use crate::api::state::ApiConfig;
use crate::cli::actions::{migrate, server, Action};
use crate::cli::commands::{
    auth, limits, ARG_DRY_RUN, ARG_DSN, ARG_PORT, ARG_PUBLIC_BASE_URL, CMD_MIGRATE_SECRETS,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use url::Url;

fn dsn(matches: &clap::ArgMatches) -> Option<SecretString> {
    matches
        .get_one::<String>(ARG_DSN)
        .filter(|dsn| !dsn.trim().is_empty())
        .map(|dsn| SecretString::from(dsn.clone()))
}

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some(sub) = matches.subcommand_matches(CMD_MIGRATE_SECRETS) {
        return Ok(Action::MigrateSecrets(migrate::Args {
            dsn: dsn(sub)
                .or_else(|| dsn(matches))
                .context("missing required argument: --dsn")?,
            hash_policy: auth::parse(sub),
            dry_run: sub.get_flag(ARG_DRY_RUN),
        }));
    }

    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let config = match matches.get_one::<String>(ARG_PUBLIC_BASE_URL) {
        Some(url) => {
            Url::parse(url).with_context(|| format!("Invalid public base URL: {url}"))?;
            ApiConfig::new(url.clone())
        }
        None => ApiConfig::default(),
    };

    Ok(Action::Server(server::Args {
        port,
        dsn: dsn(matches),
        config,
        limits: limits::parse(matches),
        hash_policy: auth::parse(matches),
    }))
}
