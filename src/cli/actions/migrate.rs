//! Bulk rehash of legacy plaintext passphrases.

use crate::{
    auth::{password::is_legacy_plaintext, HashPolicy, SecretHasher},
    store::{PgStore, Store},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: SecretString,
    pub hash_policy: HashPolicy,
    pub dry_run: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub scanned: usize,
    pub migrated: usize,
}

/// Replace every stored plaintext passphrase with its Argon2 hash.
///
/// # Errors
/// Returns an error on the first store or hashing failure.
pub async fn migrate_secrets(
    store: &dyn Store,
    hasher: &SecretHasher,
    dry_run: bool,
) -> Result<Report> {
    let mut report = Report::default();

    for agent in store.list_agents().await? {
        report.scanned += 1;
        if !is_legacy_plaintext(&agent.secret_hash) {
            continue;
        }

        report.migrated += 1;
        if dry_run {
            continue;
        }

        let hash = hasher
            .hash_blocking(agent.secret_hash.clone())
            .await
            .with_context(|| format!("Failed to hash secret for {}", agent.codename))?;
        store.update_secret_hash(agent.id, &hash).await?;
        info!("Migrated secret for {}", agent.codename);
    }

    Ok(report)
}

/// Execute the migrate-secrets action.
/// # Errors
/// Returns an error if the database is unreachable or a secret fails to migrate.
pub async fn execute(args: Args) -> Result<()> {
    let store = PgStore::connect(&args.dsn).await?;
    let hasher = SecretHasher::new(args.hash_policy)?;

    let report = migrate_secrets(&store, &hasher, args.dry_run).await?;

    if args.dry_run {
        println!(
            "{} of {} agents have legacy plaintext secrets",
            report.migrated, report.scanned
        );
    } else {
        println!(
            "Migrated {} of {} agents to Argon2 hashes",
            report.migrated, report.scanned
        );
    }

    Ok(())
}
