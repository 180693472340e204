//! Example: Feed captured device output through the driver and print events.

use ad2driver::{Ad2Driver, DriverConfig, EventKind};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut driver = Ad2Driver::new(DriverConfig::default());

    driver.register(|event| {
        match event.kind {
            EventKind::ZoneFaulted { zone } => println!("  + zone {zone} faulted"),
            EventKind::ZoneRestored { zone } => println!("  - zone {zone} restored"),
            EventKind::ArmModeChanged { partition, old, new } => {
                println!("  partition {partition}: {old:?} -> {new:?}")
            }
            EventKind::AlarmTriggered { partition, cause } => {
                println!("  !! alarm on partition {partition}: {cause:?}")
            }
            other => println!("  {other:?}"),
        }
        Ok(())
    });

    // A short capture: boot, a zone fault while arming away, the
    // matching restore, then an LRR panic report.
    let capture: &[&str] = &[
        "!Ready",
        "[0100000100000000----],003,[f70000000008001c08020000000000],\"ARMED ***AWAY***FAULT 03\"",
        "[0100000100000000----],003,[f70000000008001c08020000000000],\"ARMED ***AWAY***FAULT 03\"",
        "[1100000100000000----],008,[f70000000008001c08020000000000],\"ARMED ***AWAY***\"",
        "!LRR:000,1,CID_1120",
    ];

    for line in capture {
        println!("{line}");
        driver.feed(format!("{line}\r\n").as_bytes())?;
    }

    let state = driver.state();
    println!(
        "\nfinal state: {} zone(s) tracked, partition 1 mode {:?}",
        state.zones.len(),
        state.partitions[&1].mode
    );
    Ok(())
}
