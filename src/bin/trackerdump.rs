use std::process;
use std::time::Duration;

use ant_sync::{AntBase, DynastreamBase, FitbitBase, Radio, Tracker};
use anyhow::Context;
use clap::Parser;

/// Sync a tracker over the nearest base station and dump its data banks.
#[derive(Parser)]
struct Args {
    /// Base station variant: fitbit or dynastream
    #[arg(long, default_value = "fitbit")]
    base: String,

    /// Bulk read timeout in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Data banks to dump
    #[arg(long, value_delimiter = ',', default_values_t = [0u8, 1, 2])]
    banks: Vec<u8>,

    /// Put the tracker to sleep once the dump finishes
    #[arg(long)]
    sleep: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let base: Box<dyn AntBase> = match args.base.as_str() {
        "fitbit" => Box::new(FitbitBase),
        "dynastream" => Box::new(DynastreamBase),
        other => {
            eprintln!("Unknown base '{other}', expected fitbit or dynastream");
            process::exit(1);
        }
    };

    let mut transport = base
        .open()
        .with_context(|| format!("no {} base connected", base.name()))?;
    if let Some(millis) = args.timeout {
        transport.set_read_timeout(Duration::from_millis(millis));
    }

    let mut radio = Radio::new(transport, 0);
    let mut tracker = Tracker::new(&mut radio);

    tracker
        .init_for_transfer()
        .context("tracker bring-up failed")?;

    let info = tracker.get_info().context("info opcode failed")?;
    println!("{info}");

    for index in &args.banks {
        let data = tracker
            .read_data_bank(*index)
            .with_context(|| format!("reading data bank {index} failed"))?;
        println!("Bank {index}: {} bytes", data.len());
        for chunk in data.chunks(16) {
            let line: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            println!("  {}", line.join(" "));
        }
    }

    if args.sleep {
        tracker.command_sleep().context("sleep command failed")?;
    }

    Ok(())
}
