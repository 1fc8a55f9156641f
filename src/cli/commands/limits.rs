use clap::{builder::ValueParser, Arg, ArgAction, ArgMatches, Command};

use crate::auth::{RateLimitClass, RateLimitPolicy, RateLimits};

pub const ARG_DISABLE_RATE_LIMIT: &str = "disable-rate-limit";

/// Flag name for a class, e.g. `rate-limit-post`.
#[must_use]
pub fn arg_name(class: RateLimitClass) -> &'static str {
    match class {
        RateLimitClass::Auth => "rate-limit-auth",
        RateLimitClass::Register => "rate-limit-register",
        RateLimitClass::Post => "rate-limit-post",
        RateLimitClass::Engagement => "rate-limit-engagement",
        RateLimitClass::Read => "rate-limit-read",
    }
}

fn env_name(class: RateLimitClass) -> &'static str {
    match class {
        RateLimitClass::Auth => "MOLTCHIRP_RATE_LIMIT_AUTH",
        RateLimitClass::Register => "MOLTCHIRP_RATE_LIMIT_REGISTER",
        RateLimitClass::Post => "MOLTCHIRP_RATE_LIMIT_POST",
        RateLimitClass::Engagement => "MOLTCHIRP_RATE_LIMIT_ENGAGEMENT",
        RateLimitClass::Read => "MOLTCHIRP_RATE_LIMIT_READ",
    }
}

#[must_use]
pub fn validator_policy() -> ValueParser {
    ValueParser::from(|value: &str| value.parse::<RateLimitPolicy>())
}

/// Policy table from the flags; `None` when rate limiting is disabled.
#[must_use]
pub fn parse(matches: &ArgMatches) -> Option<RateLimits> {
    if matches.get_flag(ARG_DISABLE_RATE_LIMIT) {
        return None;
    }

    let limits = RateLimitClass::ALL
        .into_iter()
        .fold(RateLimits::default(), |limits, class| {
            match matches.get_one::<RateLimitPolicy>(arg_name(class)) {
                Some(policy) => limits.with_policy(class, *policy),
                None => limits,
            }
        });
    Some(limits)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let defaults = RateLimits::default();
    let command = RateLimitClass::ALL.into_iter().fold(command, |command, class| {
        let policy = defaults.policy(class);
        command.arg(
            Arg::new(arg_name(class))
                .long(arg_name(class))
                .help(format!(
                    "Requests allowed per window for {} endpoints, as MAX/SECONDS (default: {}/{})",
                    class.as_str(),
                    policy.max_requests,
                    policy.window.as_secs()
                ))
                .env(env_name(class))
                .value_parser(validator_policy()),
        )
    });

    command.arg(
        Arg::new(ARG_DISABLE_RATE_LIMIT)
            .long(ARG_DISABLE_RATE_LIMIT)
            .help("Admit every request without counting")
            .env("MOLTCHIRP_DISABLE_RATE_LIMIT")
            .action(ArgAction::SetTrue),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults_when_no_flags() {
        let matches = with_args(Command::new("test")).get_matches_from(["test"]);
        assert_eq!(parse(&matches), Some(RateLimits::default()));
    }

    #[test]
    fn overrides_single_class() {
        let matches = with_args(Command::new("test"))
            .get_matches_from(["test", "--rate-limit-post", "10/30"]);
        let limits = parse(&matches).unwrap_or_default();
        assert_eq!(
            limits.policy(RateLimitClass::Post),
            RateLimitPolicy {
                max_requests: 10,
                window: Duration::from_secs(30),
            }
        );
        assert_eq!(
            limits.policy(RateLimitClass::Read),
            RateLimits::default().policy(RateLimitClass::Read)
        );
    }

    #[test]
    fn rejects_bad_policy() {
        let result = with_args(Command::new("test"))
            .try_get_matches_from(["test", "--rate-limit-auth", "0/60"]);
        assert!(result.is_err());

        let result = with_args(Command::new("test"))
            .try_get_matches_from(["test", "--rate-limit-read", "5/18446744073709551615"]);
        assert!(result.is_err());
    }

    #[test]
    fn disable_flag() {
        let matches = with_args(Command::new("test"))
            .get_matches_from(["test", "--disable-rate-limit"]);
        assert_eq!(parse(&matches), None);
    }
}
