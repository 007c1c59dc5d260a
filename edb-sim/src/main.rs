//! Drive a simulated EDB target from the command line.
//!
//! Every invocation boots a fresh simulated board, optionally loads memory
//! and a breakpoint store, runs one debugger interaction and prints what the
//! target answered.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use edb_core::hal::NvStore;
use edb_core::monitor::BREAKPOINT_COUNT;
use edb_core::sim::{FileNvStore, RamNvStore, SimBoard};
use edb_core::{DebugState, MonitorConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Monitor configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Breakpoint store (JSON); kept in memory when omitted
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Preload target memory, as ADDRESS:HEXBYTES (repeatable)
    #[arg(short, long, global = true, value_parser = parse_load)]
    load: Vec<(u32, Vec<u8>)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interrupt the target and print the captured program counter
    Pc {
        /// Program counter the application is at
        #[arg(long, value_parser = parse_hex, default_value = "0")]
        at: u32,
    },
    /// Read memory
    Read {
        #[arg(value_parser = parse_hex)]
        address: u32,
        length: u8,
    },
    /// Write memory
    Write {
        #[arg(value_parser = parse_hex)]
        address: u32,
        /// Hex string (e.g. "DEADBEEF")
        data: String,
    },
    /// Enable or disable an internal breakpoint
    Break {
        index: u8,
        #[arg(value_enum, default_value_t = Toggle::On)]
        toggle: Toggle,
    },
    /// Run an application that passes internal breakpoint INDEX and report
    /// why it stopped
    Context { index: u8 },
    /// Have the target echo a value on the signal line
    Echo { value: u8 },
    /// Pull application output
    AppOutput {
        /// Text the application offers
        #[arg(default_value = "hello from the target")]
        text: String,
    },
    /// Run an application that prints from inside ITERATIONS energy guards
    Guard {
        #[arg(default_value_t = 1)]
        iterations: u32,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    let s = s.trim_start_matches("0x");
    u32::from_str_radix(s, 16)
}

fn parse_load(s: &str) -> Result<(u32, Vec<u8>), String> {
    let (address, data) = s.split_once(':').ok_or("expected ADDRESS:HEXBYTES")?;
    let address = parse_hex(address).map_err(|e| format!("bad address: {e}"))?;
    let data = hex::decode(data.trim_start_matches("0x")).map_err(|e| format!("bad data: {e}"))?;
    Ok((address, data))
}

fn boot(cli: &Cli) -> Result<SimBoard> {
    let config = match &cli.config {
        Some(path) => MonitorConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    let store: Box<dyn NvStore> = match &cli.store {
        Some(path) => Box::new(FileNvStore::new(path)),
        None => Box::new(RamNvStore::new()),
    };
    let board = SimBoard::with_store(config, store).context("building the simulated board")?;
    for (address, data) in &cli.load {
        board.memory.load(*address, data);
    }
    board.monitor.init();
    log::debug!("target booted, breakpoints 0x{:04X}", board.monitor.breakpoint_mask());
    Ok(board)
}

/// Interrupt the running target, run `commands` in its command loop and let
/// it go again.
fn with_session<T>(board: &SimBoard, commands: impl FnOnce(&SimBoard) -> Result<T>) -> Result<T> {
    board.host.interrupt().context("interrupting the target")?;
    let value = commands(board)?;
    board.host.detach().context("detaching")?;
    Ok(value)
}

fn join<T>(app: std::thread::JoinHandle<T>) -> Result<T> {
    match app.join() {
        Ok(value) => Ok(value),
        Err(_) => bail!("application thread panicked"),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let board = boot(cli)?;

    match &cli.command {
        Commands::Pc { at } => {
            board.set_program_counter(*at);
            let pc = with_session(&board, |board| Ok(board.host.get_pc()?))?;
            println!("PC: 0x{pc:08X}");
        }
        Commands::Read { address, length } => {
            let data = with_session(&board, |board| Ok(board.host.read_mem(*address, *length)?))?;
            println!("0x{address:08X}: {data:02X?}");
        }
        Commands::Write { address, data } => {
            let bytes = hex::decode(data.trim_start_matches("0x")).context("parsing data")?;
            let echo = with_session(&board, |board| Ok(board.host.write_mem(*address, &bytes)?))?;
            println!("Written {} bytes, 0x{address:08X} now reads 0x{echo:02X}", bytes.len());
        }
        Commands::Break { index, toggle } => {
            let enable = *toggle == Toggle::On;
            with_session(&board, |board| Ok(board.host.set_breakpoint(*index, enable)?))?;
            println!("Breakpoint mask: 0x{:04X}", board.monitor.breakpoint_mask());
        }
        Commands::Context { index } => {
            let index = *index;
            if index >= BREAKPOINT_COUNT {
                bail!("no such breakpoint {index}, the target has {BREAKPOINT_COUNT}");
            }
            let app = board.spawn_app(move |monitor| monitor.internal_breakpoint(index))?;
            if board.monitor.breakpoint_mask() & (1 << index) == 0 {
                join(app)?;
                println!("Breakpoint {index} is disabled, the application ran through");
                return Ok(());
            }
            let entry = board.host.serve_request().context("serving the request")?;
            let (kind, id) = board.host.interrupt_context()?;
            board.host.detach()?;
            join(app)?;
            println!("Stopped: {kind:?} {id} (entered with {entry:?})");
        }
        Commands::Echo { value } => {
            let pulse = with_session(&board, |board| Ok(board.host.serial_echo(*value)?))?;
            println!("Echo: {pulse:?}");
        }
        Commands::AppOutput { text } => {
            let bytes = text.clone().into_bytes();
            board.monitor.set_app_output(move |buf| {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                len
            });
            let output = with_session(&board, |board| Ok(board.host.app_output()?))?;
            println!("{}", String::from_utf8_lossy(&output));
        }
        Commands::Guard { iterations } => {
            let iterations = *iterations;
            let app = board.spawn_app(move |monitor| {
                for i in 0..iterations {
                    edb_core::energy_guard!(monitor, {
                        monitor.console().print(format_args!("guarded iteration {i}\n"));
                    });
                }
            })?;
            for _ in 0..iterations {
                board.host.serve_request().context("serving the guard")?;
                let stdio = board.host.recv_stdio()?;
                board.host.finish_guard()?;
                print!("{}", String::from_utf8_lossy(&stdio));
            }
            join(app)?;
        }
    }

    if board.monitor.state() == DebugState::Debug {
        log::warn!("target left in debug mode");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    run(&cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_accepts_prefix() {
        assert_eq!(parse_hex("0x2000").unwrap(), 0x2000);
        assert_eq!(parse_hex("1c00").unwrap(), 0x1C00);
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn test_parse_load() {
        assert_eq!(parse_load("0x10:0A0B").unwrap(), (0x10, vec![0x0A, 0x0B]));
        assert!(parse_load("0x10").is_err());
        assert!(parse_load("0x10:0").is_err());
    }

    #[test]
    fn test_cli_parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from(["edb-sim", "read", "2000", "4", "--load", "2000:0B16212C"])
            .unwrap();
        assert_eq!(cli.load, vec![(0x2000, vec![11, 22, 33, 44])]);
        assert!(matches!(cli.command, Commands::Read { address: 0x2000, length: 4 }));
    }

    #[test]
    fn test_break_defaults_to_on() {
        let cli = Cli::try_parse_from(["edb-sim", "break", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Break { index: 3, toggle: Toggle::On }));
        let cli = Cli::try_parse_from(["edb-sim", "break", "3", "off"]).unwrap();
        assert!(matches!(cli.command, Commands::Break { index: 3, toggle: Toggle::Off }));
    }

    #[test]
    fn test_context_rejects_unknown_breakpoint() {
        let cli = Cli::try_parse_from(["edb-sim", "context", "20"]).unwrap();
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().contains("no such breakpoint 20"), "{err}");
    }

    #[test]
    fn test_context_on_disabled_breakpoint_runs_through() {
        let cli = Cli::try_parse_from(["edb-sim", "context", "15"]).unwrap();
        run(&cli).unwrap();
    }

    #[test]
    fn test_guard_iterations_run() {
        let cli = Cli::try_parse_from(["edb-sim", "guard", "2"]).unwrap();
        run(&cli).unwrap();
    }

    #[test]
    fn test_read_on_simulated_target() {
        let cli = Cli::try_parse_from(["edb-sim", "--load", "2000:0B16212C", "read", "2000", "4"])
            .unwrap();
        let board = boot(&cli).unwrap();
        let data = with_session(&board, |board| Ok(board.host.read_mem(0x2000, 4)?)).unwrap();
        assert_eq!(data, vec![11, 22, 33, 44]);
    }
}
