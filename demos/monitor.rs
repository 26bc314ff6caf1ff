use std::env;

use uponor_x265::{MessageLogMode, Poller, PollerConfig, TemperatureScale};

#[tokio::main]
async fn main() -> uponor_x265::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(addr) = args.get(1) else {
        eprintln!("usage: monitor <host[:port]> [--fahrenheit] [--log <path>]");
        std::process::exit(2);
    };

    let mut config = PollerConfig::from_address(addr)?;
    if args.iter().any(|a| a == "--fahrenheit") {
        config = config.temperature_scale(TemperatureScale::TenthsFahrenheit);
    }

    let mut builder = Poller::builder(config)
        .on_snapshot_updated(|snapshot| {
            println!(
                "snapshot #{} at {}: {} variables",
                snapshot.sequence(),
                snapshot.taken_at().format("%H:%M:%S"),
                snapshot.len()
            );
        })
        .on_readings_changed(|diff, _| {
            for reading in diff.added.iter().chain(&diff.changed) {
                match &reading.value {
                    Some(value) => println!("  {} = {value}", reading.id),
                    None => println!("  {} unavailable", reading.id),
                }
            }
            for id in &diff.removed {
                println!("  {id} removed");
            }
        });

    if let Some(pos) = args.iter().position(|a| a == "--log")
        && let Some(path) = args.get(pos + 1)
    {
        builder = builder.message_log(MessageLogMode::Diffed, path);
    }

    let poller = builder.build()?;
    let handle = poller.spawn();

    println!("Polling {addr}, Ctrl-C to stop...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("signal error: {e}");
    }
    poller.shutdown();
    if let Err(e) = handle.await {
        eprintln!("poll loop failed: {e}");
    }
    Ok(())
}
