use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Level names accepted from `TRAVIS_SSO_LOG_LEVEL`, indexed by verbosity.
const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Accept a level name or its verbosity count.
fn parse_level(level: &str) -> Result<u8, String> {
    let level = level.trim().to_ascii_lowercase();
    LEVELS
        .iter()
        .position(|name| *name == level)
        .and_then(|index| u8::try_from(index).ok())
        .or_else(|| level.parse::<u8>().ok().filter(|count| *count <= 5))
        .ok_or_else(|| format!("invalid log level {level:?}, expected one of {}", LEVELS.join(", ")))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Log verbosity, repeat to raise: ERROR, WARN, INFO, DEBUG, TRACE")
            .env("TRAVIS_SSO_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(ValueParser::from(parse_level)),
    )
}
