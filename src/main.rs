//! Diagnostic CLI for the Colibri wallet transport.
//!
//! `colibri-link scan` discovers nearby devices.
//! `colibri-link connect [address]` establishes a session, by address or by
//! scanning for the wallet service.
//! `colibri-link methods` connects and asks the wallet for its RPC methods.

use anyhow::Context;
use colibri_link::infrastructure::logging;
use colibri_link::{BleService, RpcOutcome, SettingsService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?.get().clone();
    let _logging = logging::init_logger(&settings.log_settings)?;

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "scan".to_string());
    let target = args.next();

    let service = BleService::open(settings)
        .await
        .context("opening BLE service")?;

    // Mirror the transport log to stdout while the command runs.
    let mut messages = service.messages();
    let printer = tokio::spawn(async move {
        while let Ok(entry) = messages.recv().await {
            println!("{entry}");
        }
    });

    let result = run(&service, &command, target).await;
    service.close().await;
    printer.abort();
    result
}

async fn run(service: &BleService, command: &str, target: Option<String>) -> anyhow::Result<()> {
    match command {
        "scan" => {
            let devices = service.scan().await?;
            for device in devices {
                println!(
                    "{}  {:>4} dBm  {:<9}  {}",
                    device.address,
                    device.rssi,
                    device.signal_strength().as_str(),
                    device.display_name(),
                );
            }
            Ok(())
        }
        "connect" => {
            match target {
                Some(address) => {
                    let devices = service.scan().await?;
                    let record = devices
                        .into_iter()
                        .find(|d| d.address.eq_ignore_ascii_case(&address))
                        .context("device did not appear during the scan")?;
                    service.connect(&record).await?;
                }
                None => {
                    service.connect_by_service().await?;
                }
            }
            service.disconnect().await;
            Ok(())
        }
        "methods" => {
            service.connect_by_service().await?;
            match service.list_methods().await? {
                RpcOutcome::Complete(text) => println!("{text}"),
                RpcOutcome::Partial {
                    text,
                    bytes_received,
                } => println!("timed out with {bytes_received} partial byte(s): {text}"),
            }
            service.disconnect().await;
            Ok(())
        }
        other => anyhow::bail!("unknown command: {other} (expected scan | connect [address] | methods)"),
    }
}
