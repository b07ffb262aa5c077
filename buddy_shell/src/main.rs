use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use buddy_sim::{AllocError, BuddyAllocator, FreeError, Strip};
use clap::Parser;
use log::LevelFilter;

mod command;
mod logger;

use command::Command;

const PROMPT: &str = "How many blocks do you want to allocate/free?";

/// Largest `--size` accepted.
const MAX_SIZE: u64 = 1 << 16;

#[derive(Parser, Debug)]
#[command(name = "buddy_shell", about = "Interactive binary-buddy allocator simulation")]
struct Args {
    /// Number of units managed by the allocator.
    #[arg(
        short,
        long,
        value_name = "UNITS",
        default_value_t = 64,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..=MAX_SIZE)
    )]
    size: usize,

    /// Allocator log level written to stderr (off, error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL", default_value_t = LevelFilter::Off)]
    log_level: LevelFilter,
}

/// Performs `command` and reports the outcome to `out`.
fn execute<W: Write>(buddy: &mut BuddyAllocator, command: Command, out: &mut W) -> io::Result<()> {
    match command {
        Command::Allocate(size) => match buddy.allocate(size) {
            Ok(a) => {
                for split in &a.splits {
                    writeln!(out, "(Splitting {}/{})", split.start(), split.size())?;
                }
                writeln!(out, "Blocks {} allocated:", a.block)?;
            }
            Err(AllocError::OutOfMemory(_)) => writeln!(
                out,
                "That size is no longer available. Please free it up or try a smaller size."
            )?,
            Err(e) => writeln!(out, "{e}.")?,
        },

        Command::Free(start) => match buddy.free(start) {
            Ok(d) => {
                for m in &d.merges {
                    writeln!(
                        out,
                        "(merging {}/{} and {}/{})",
                        m.lower.start(),
                        m.lower.size(),
                        m.upper.start(),
                        m.upper.size()
                    )?;
                }
                writeln!(out, "Blocks {} freed:", d.block)?;
            }
            Err(FreeError::NotAllocated(_)) => writeln!(out, "No allocation there.")?,
        },

        Command::Quit => {}
    }

    Ok(())
}

/// Runs the command loop until `q` or end of input.
fn run<R: BufRead, W: Write>(buddy: &mut BuddyAllocator, input: R, out: &mut W) -> io::Result<()> {
    let (size, capacity) = (buddy.total_size(), buddy.capacity());

    writeln!(out, "{}", Strip::new(buddy))?;

    let mut lines = input.lines();
    loop {
        writeln!(out, "{PROMPT}")?;
        out.flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };

        match Command::parse(&line, size, capacity) {
            Ok(Command::Quit) => break,
            Ok(command) => {
                execute(buddy, command, out)?;
                writeln!(out, "{}", Strip::new(buddy))?;
            }
            Err(e) => writeln!(out, "{e}")?,
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    logger::init(args.log_level).context("failed to install logger")?;

    let mut buddy = BuddyAllocator::try_new(args.size)
        .with_context(|| format!("cannot simulate {} units", args.size))?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    run(&mut buddy, stdin.lock(), &mut stdout.lock()).context("I/O error")?;

    Ok(())
}
