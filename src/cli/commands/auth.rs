use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::auth::{
    password::{DEFAULT_ITERATIONS, DEFAULT_MEMORY_KIB, DEFAULT_PARALLELISM},
    HashPolicy,
};

// Must match the numeric defaults in `auth::password`.
const DEFAULT_MEMORY_KIB_ARG: &str = "19456";
const DEFAULT_ITERATIONS_ARG: &str = "2";
const DEFAULT_PARALLELISM_ARG: &str = "1";

pub const ARG_HASH_MEMORY_KIB: &str = "hash-memory-kib";
pub const ARG_HASH_ITERATIONS: &str = "hash-iterations";
pub const ARG_HASH_PARALLELISM: &str = "hash-parallelism";
pub const ARG_LEGACY_PLAINTEXT: &str = "legacy-plaintext-secrets";

/// Hasher work factors and the legacy switch from the flags.
#[must_use]
pub fn parse(matches: &ArgMatches) -> HashPolicy {
    let get = |id: &str, default: u32| matches.get_one::<u32>(id).copied().unwrap_or(default);

    HashPolicy::default()
        .with_memory_kib(get(ARG_HASH_MEMORY_KIB, DEFAULT_MEMORY_KIB))
        .with_iterations(get(ARG_HASH_ITERATIONS, DEFAULT_ITERATIONS))
        .with_parallelism(get(ARG_HASH_PARALLELISM, DEFAULT_PARALLELISM))
        .with_legacy_plaintext(
            matches
                .get_one::<bool>(ARG_LEGACY_PLAINTEXT)
                .copied()
                .unwrap_or(true),
        )
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_HASH_MEMORY_KIB)
                .long(ARG_HASH_MEMORY_KIB)
                .help("Argon2 memory cost in KiB")
                .env("MOLTCHIRP_HASH_MEMORY_KIB")
                .global(true)
                .default_value(DEFAULT_MEMORY_KIB_ARG)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_HASH_ITERATIONS)
                .long(ARG_HASH_ITERATIONS)
                .help("Argon2 iterations")
                .env("MOLTCHIRP_HASH_ITERATIONS")
                .global(true)
                .default_value(DEFAULT_ITERATIONS_ARG)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_HASH_PARALLELISM)
                .long(ARG_HASH_PARALLELISM)
                .help("Argon2 lanes")
                .env("MOLTCHIRP_HASH_PARALLELISM")
                .global(true)
                .default_value(DEFAULT_PARALLELISM_ARG)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_LEGACY_PLAINTEXT)
                .long(ARG_LEGACY_PLAINTEXT)
                .help("Accept stored passphrases that were saved before hashing (true/false)")
                .long_help(
                    "Accept stored passphrases that were saved before hashing.\n\nLegacy values are rehashed on the next successful login. Turn this off once `moltchirp migrate-secrets` has run.",
                )
                .env("MOLTCHIRP_LEGACY_PLAINTEXT_SECRETS")
                .global(true)
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let matches = with_args(Command::new("test")).get_matches_from(["test"]);
        let policy = parse(&matches);
        assert_eq!(policy, HashPolicy::default());
        assert!(policy.legacy_plaintext());
    }

    #[test]
    fn default_args_match_hasher_defaults() {
        assert_eq!(DEFAULT_MEMORY_KIB_ARG, DEFAULT_MEMORY_KIB.to_string());
        assert_eq!(DEFAULT_ITERATIONS_ARG, DEFAULT_ITERATIONS.to_string());
        assert_eq!(DEFAULT_PARALLELISM_ARG, DEFAULT_PARALLELISM.to_string());
    }

    #[test]
    fn overrides() {
        let matches = with_args(Command::new("test")).get_matches_from([
            "test",
            "--hash-memory-kib",
            "8192",
            "--legacy-plaintext-secrets",
            "false",
        ]);
        let policy = parse(&matches);
        assert_eq!(
            policy,
            HashPolicy::default()
                .with_memory_kib(8192)
                .with_legacy_plaintext(false)
        );
    }
}
