//! Example: Encode commands and show the exact bytes a transport would send.

use ad2driver::{Ad2Driver, ArmMode, CommandRequest, DriverConfig, OutputAction, PanicKind};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let driver = Ad2Driver::new(DriverConfig::default());

    let requests = [
        CommandRequest::Arm {
            mode: ArmMode::Away,
            code: "1234".to_string(),
        },
        CommandRequest::Arm {
            mode: ArmMode::Stay,
            code: "1234".to_string(),
        },
        CommandRequest::Disarm {
            code: "1234".to_string(),
        },
        CommandRequest::Panic {
            kind: PanicKind::Fire,
        },
        CommandRequest::ProgramOutput {
            id: 5,
            action: OutputAction::Fault,
        },
        CommandRequest::ConfigWrite {
            key: "MASK".to_string(),
            value: "ffffffff".to_string(),
        },
        CommandRequest::ConfigRead,
        CommandRequest::RequestVersion,
    ];

    for request in &requests {
        let bytes = driver.submit(request)?;
        println!("{:16} -> {:?}", request.label(), bytes);
    }

    // Validation failures never produce wire bytes.
    let bad = CommandRequest::Disarm {
        code: "12".to_string(),
    };
    match driver.submit(&bad) {
        Err(e) => println!("{:16} -> rejected: {e}", bad.label()),
        Ok(_) => unreachable!(),
    }
    Ok(())
}
