//! BLE Scanner Module
//!
//! Bounded-duration device discovery over the adapter event stream, with
//! per-address deduplication and RSSI-ranked snapshots.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{watch, Notify};
use tracing::info;

use crate::domain::models::DeviceRecord;
use crate::error::BleError;
use crate::infrastructure::bluetooth::log::MessageLog;
use crate::infrastructure::bluetooth::protocol;

/// Observation set for one scan pass, keyed by address. The newest
/// advertisement for an address replaces the previous one; no history is
/// kept.
#[derive(Debug, Default)]
pub(crate) struct ScanRegistry {
    devices: HashMap<String, DeviceRecord>,
}

impl ScanRegistry {
    pub fn observe(&mut self, record: DeviceRecord) {
        self.devices.insert(record.address.clone(), record);
    }

    /// Current observations, strongest signal first.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.devices.values().cloned().collect();
        records.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        records
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// BLE scanner for discovering nearby peripherals.
pub struct BleScanner {
    adapter: Adapter,
    log: MessageLog,
    devices_tx: watch::Sender<Vec<DeviceRecord>>,
    known_tx: watch::Sender<Vec<DeviceRecord>>,
    scanning_tx: watch::Sender<bool>,
    cancel: Notify,
}

impl BleScanner {
    pub fn new(adapter: Adapter, log: MessageLog) -> Self {
        Self {
            adapter,
            log,
            devices_tx: watch::Sender::new(Vec::new()),
            known_tx: watch::Sender::new(Vec::new()),
            scanning_tx: watch::Sender::new(false),
            cancel: Notify::new(),
        }
    }

    /// Run one scan pass of at most `duration`, publishing an updated
    /// snapshot after every observation and returning the final set sorted
    /// by descending signal strength.
    ///
    /// [`stop`](Self::stop) ends the pass early; the snapshot then reflects
    /// observations up to that point.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<DeviceRecord>, BleError> {
        let started = self.scanning_tx.send_if_modified(|scanning| {
            if *scanning {
                false
            } else {
                *scanning = true;
                true
            }
        });
        if !started {
            return Err(BleError::Busy);
        }
        self.devices_tx.send_replace(Vec::new());
        self.log.publish("Starting BLE device scan...");

        let result = self.run_scan(duration).await;

        if let Err(err) = self.adapter.stop_scan().await {
            self.log.publish(format!("Failed to stop scan: {err}"));
        }
        self.scanning_tx.send_replace(false);

        match result {
            Ok(registry) => {
                let snapshot = registry.snapshot();
                self.devices_tx.send_replace(snapshot.clone());
                self.log
                    .publish(format!("Scan completed. Found {} devices.", registry.len()));
                Ok(snapshot)
            }
            Err(err) => {
                self.log.publish(format!("Scan error: {err}"));
                Err(err)
            }
        }
    }

    async fn run_scan(&self, duration: Duration) -> Result<ScanRegistry, BleError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        info!("Scan started for {:?}", duration);

        let mut registry = ScanRegistry::default();
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = &mut cancelled => {
                    self.log.publish("Scan stopped.");
                    break;
                }
                event = events.next() => {
                    let Some(event) = event else { break };
                    let Some(id) = advertising_peripheral(&event) else { continue };
                    if let Ok(peripheral) = self.adapter.peripheral(id).await {
                        if let Some(record) = record_from_peripheral(&peripheral).await {
                            self.log.publish(format!(
                                "Device: {} | Name: {:?} | RSSI: {} dBm",
                                record.address, record.name, record.rssi
                            ));
                            registry.observe(record);
                            self.devices_tx.send_replace(registry.snapshot());
                        }
                    }
                }
            }
        }

        Ok(registry)
    }

    /// Cancel an in-flight scan pass. No effect while idle.
    pub fn stop(&self) {
        self.cancel.notify_waiters();
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning_tx.borrow()
    }

    /// Peripherals the adapter already knows (bonded or cached), reported
    /// with a placeholder RSSI since no advertisement backs them.
    pub async fn known_devices(&self) -> Result<Vec<DeviceRecord>, BleError> {
        let peripherals = self.adapter.peripherals().await?;
        let mut records = Vec::new();
        for peripheral in &peripherals {
            if let Some(mut record) = record_from_peripheral(peripheral).await {
                if record.name.is_none() {
                    record.name = Some("Bonded Device".to_string());
                }
                records.push(record);
            }
        }
        self.log.publish(format!(
            "Found {} bonded BLE devices (RSSI unknown)",
            records.len()
        ));
        self.known_tx.send_replace(records.clone());
        Ok(records)
    }

    pub fn devices_watch(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.devices_tx.subscribe()
    }

    pub fn known_devices_watch(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.known_tx.subscribe()
    }

    pub fn scanning_watch(&self) -> watch::Receiver<bool> {
        self.scanning_tx.subscribe()
    }
}

/// Events that carry fresh advertisement data for a peripheral.
fn advertising_peripheral(event: &CentralEvent) -> Option<&PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
        CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

/// Build an immutable record from a peripheral's current properties.
pub(crate) async fn record_from_peripheral(peripheral: &Peripheral) -> Option<DeviceRecord> {
    let props = peripheral.properties().await.ok().flatten()?;
    let name = resolve_name(
        props.local_name.as_deref(),
        props.manufacturer_data.keys().next().copied(),
    );
    Some(DeviceRecord {
        address: peripheral.address().to_string(),
        name,
        rssi: props.rssi.unwrap_or(protocol::BONDED_DEFAULT_RSSI),
        service_uuids: props.services,
        connectable: true,
    })
}

/// Naming fallback chain: advertised name, then manufacturer lookup.
/// `None` leaves the record to its display placeholder.
fn resolve_name(local_name: Option<&str>, manufacturer_id: Option<u16>) -> Option<String> {
    match local_name {
        Some(n) if !n.trim().is_empty() => Some(n.to_string()),
        _ => manufacturer_id.map(protocol::manufacturer_label),
    }
}
