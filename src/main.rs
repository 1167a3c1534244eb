use iothub_device::{
    cancel_on_ctrl_c, AzureIotHub, Console, DeviceConfig, DeviceSession, Operation, SessionOutcome,
    TelemetryPlan,
};
use log::info;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("IoT Hub simulated device");
    println!("Press Ctrl-C to exit");

    let config = match DeviceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("sending telemetry as {}", config.identity.device_id);

    let interrupt = CancellationToken::new();
    cancel_on_ctrl_c(interrupt.clone());

    let session = DeviceSession::new(AzureIotHub::new(&config), Console::stdout())
        .with_connect_timeout(config.connect_timeout);
    let operation = Operation::Telemetry(TelemetryPlan::from_config(&config));

    // The session has already reported any error on the console.
    match session.run(operation, interrupt).await {
        Ok(report) => {
            if report.outcome == SessionOutcome::Interrupted {
                println!("Keyboard Interrupt - sample stopped");
            }
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}
