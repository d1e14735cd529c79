//! Per-test option parsing

use crate::nettest::{NetTest, TestOptions, RESUME_OPTION};
use clap::{Arg, ArgAction, ArgMatches, Command};

/// Build the argument parser for one test
pub fn test_command(test: &dyn NetTest) -> Command {
    let mut command = Command::new(test.short_name())
        .about(test.description())
        .no_binary_name(true)
        .arg(
            Arg::new(RESUME_OPTION)
                .long(RESUME_OPTION)
                .help("Skip this many inputs")
                .value_parser(clap::value_parser!(usize))
                .default_value("0"),
        );

    for spec in test.options_spec() {
        let mut arg = Arg::new(spec.long).long(spec.long).help(spec.help);
        if let Some(short) = spec.short {
            arg = arg.short(short);
        }
        arg = if spec.takes_value {
            let arg = arg.action(ArgAction::Set);
            match spec.default {
                Some(default) => arg.default_value(default),
                None => arg,
            }
        } else {
            arg.action(ArgAction::SetTrue)
        };
        command = command.arg(arg);
    }

    command
}

/// Parse the arguments that followed the test name
pub fn parse_test_options(test: &dyn NetTest, args: &[String]) -> Result<TestOptions, clap::Error> {
    let matches = test_command(test).try_get_matches_from(args)?;
    Ok(collect(test, &matches))
}

fn collect(test: &dyn NetTest, matches: &ArgMatches) -> TestOptions {
    let resume = matches
        .get_one::<usize>(RESUME_OPTION)
        .copied()
        .unwrap_or(0);
    let mut options = TestOptions::new().with_resume(resume);

    for spec in test.options_spec() {
        if spec.takes_value {
            if let Some(value) = matches.get_one::<String>(spec.long) {
                options = options.with_value(spec.long, value.clone());
            }
        } else if matches.get_flag(spec.long) {
            options = options.with_flag(spec.long);
        }
    }

    options
}
