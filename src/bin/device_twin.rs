use iothub_device::{
    cancel_on_ctrl_c, AzureIotHub, Console, DeviceConfig, DeviceSession, Operation, TwinPlan,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("IoT Hub simulated device");

    let config = match DeviceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let interrupt = CancellationToken::new();
    cancel_on_ctrl_c(interrupt.clone());

    let result = DeviceSession::new(AzureIotHub::new(&config), Console::stdout())
        .with_connect_timeout(config.connect_timeout)
        .run(Operation::Twin(TwinPlan::from_config(&config)), interrupt)
        .await;
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
