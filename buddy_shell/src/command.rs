//! Parsing of shell input lines.

use std::fmt;

/// A command entered at the prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `a N`: allocate `N` units.
    Allocate(usize),
    /// `f N`: free the allocation starting at unit `N`.
    Free(usize),
    /// `q`: leave the shell.
    Quit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// The line is empty or does not start with a known command.
    Unknown,
    /// The argument is missing, not an integer, or out of range.
    InvalidArgument,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown => {
                f.write_str("commands: 'a' for allocate, 'f' for free, and 'q' for quit.")
            }
            CommandError::InvalidArgument => {
                f.write_str("Please enter valid int for the second argument.")
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Parses the argument of `a` or `f`, accepting values in `min..=max`.
fn parse_arg(arg: Option<&str>, min: i64, max: usize) -> Result<usize, CommandError> {
    let value: i64 = arg
        .ok_or(CommandError::InvalidArgument)?
        .parse()
        .map_err(|_| CommandError::InvalidArgument)?;

    if value < min {
        return Err(CommandError::InvalidArgument);
    }

    usize::try_from(value)
        .ok()
        .filter(|&v| v <= max)
        .ok_or(CommandError::InvalidArgument)
}

impl Command {
    /// Parses one input line for an allocator of `size` units whose blocks
    /// span `capacity` units.
    ///
    /// Allocation sizes must lie in `1..=size` and free starts in
    /// `0..capacity`. Arguments beyond the second are ignored.
    pub fn parse(line: &str, size: usize, capacity: usize) -> Result<Command, CommandError> {
        let mut words = line.split_whitespace();

        match words.next() {
            Some("q") => Ok(Command::Quit),
            Some("a") => parse_arg(words.next(), 1, size).map(Command::Allocate),
            Some("f") => {
                let last = capacity.checked_sub(1).ok_or(CommandError::InvalidArgument)?;
                parse_arg(words.next(), 0, last).map(Command::Free)
            }
            _ => Err(CommandError::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("a 7", 64, 64), Ok(Command::Allocate(7)));
        assert_eq!(Command::parse("  f   0 ", 64, 64), Ok(Command::Free(0)));
        assert_eq!(Command::parse("q", 64, 64), Ok(Command::Quit));
        assert_eq!(Command::parse("q now", 64, 64), Ok(Command::Quit));
        assert_eq!(Command::parse("a 64 extra", 64, 64), Ok(Command::Allocate(64)));
    }

    #[test]
    fn rejects_unknown_commands() {
        for line in ["", "   ", "x 1", "alloc 4", "A 4"] {
            assert_eq!(Command::parse(line, 64, 64), Err(CommandError::Unknown), "{line:?}");
        }
    }

    #[test]
    fn rejects_bad_arguments() {
        for line in ["a", "a 0", "a -1", "a 65", "a four", "a 1.5", "f", "f -1", "f 64"] {
            assert_eq!(
                Command::parse(line, 64, 64),
                Err(CommandError::InvalidArgument),
                "{line:?}"
            );
        }
    }

    #[test]
    fn bounds_follow_size_and_capacity() {
        assert_eq!(Command::parse("a 1", 64, 64), Ok(Command::Allocate(1)));
        assert_eq!(Command::parse("f 63", 64, 64), Ok(Command::Free(63)));

        // Requests stop at the configured size; starts run to the capacity.
        assert_eq!(Command::parse("a 101", 100, 128), Err(CommandError::InvalidArgument));
        assert_eq!(Command::parse("f 112", 100, 128), Ok(Command::Free(112)));
        assert_eq!(Command::parse("f 127", 100, 128), Ok(Command::Free(127)));
        assert_eq!(Command::parse("f 128", 100, 128), Err(CommandError::InvalidArgument));
    }
}
