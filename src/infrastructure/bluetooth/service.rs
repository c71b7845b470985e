//! Bluetooth Service Module
//!
//! Main service that coordinates scanning, connection, and RPC traffic for
//! the Colibri wallet. This is the surface the presentation layer consumes:
//! the operations plus the observable state, device collections, scanning
//! flag, and message log.

use std::sync::Arc;
use std::time::Duration;

use btleplug::api::Manager as _;
use btleplug::platform::{Adapter, Manager};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::domain::models::{ConnectionState, DeviceRecord};
use crate::domain::settings::LinkSettings;
use crate::error::BleError;
use crate::infrastructure::bluetooth::connection::{
    ConnectionConfig, ConnectionManager, SessionGuard, SessionSink,
};
use crate::infrastructure::bluetooth::log::{LogEntry, MessageLog};
use crate::infrastructure::bluetooth::rpc::{RpcChannel, RpcOutcome};
use crate::infrastructure::bluetooth::scanner::BleScanner;

/// Main Bluetooth service coordinating all BLE operations.
///
/// Constructed with [`open`](Self::open) and torn down with
/// [`close`](Self::close); callers hold and pass the handle explicitly,
/// there is no global instance.
pub struct BleService {
    scanner: BleScanner,
    manager: ConnectionManager,
    rpc: Arc<RpcChannel>,
    log: MessageLog,
    settings: LinkSettings,
}

impl BleService {
    /// Acquire the first BLE adapter and assemble the transport around it.
    pub async fn open(settings: LinkSettings) -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::LinkFailed("no Bluetooth adapter available".into()))?;
        info!("Using adapter {:?}", adapter);

        Ok(Self::with_adapter(adapter, settings))
    }

    fn with_adapter(adapter: Adapter, settings: LinkSettings) -> Self {
        let log = MessageLog::default();
        let guard = SessionGuard::new(log.clone());
        let rpc = Arc::new(RpcChannel::new(
            Arc::new(SessionSink::new(guard.endpoints())),
            settings.rpc_timeout(),
            settings.max_response_size,
            log.clone(),
        ));
        let config = ConnectionConfig {
            connect_timeout: settings.connect_timeout(),
            requested_mtu: settings.requested_mtu,
            ..ConnectionConfig::default()
        };
        let manager = ConnectionManager::new(
            adapter.clone(),
            config,
            guard,
            rpc.clone(),
            log.clone(),
        );
        let scanner = BleScanner::new(adapter, log.clone());

        Self {
            scanner,
            manager,
            rpc,
            log,
            settings,
        }
    }

    /// Run one discovery pass of the configured duration.
    pub async fn scan(&self) -> Result<Vec<DeviceRecord>, BleError> {
        self.scanner.scan(self.settings.scan_duration()).await
    }

    /// Run one discovery pass of `duration`.
    pub async fn scan_for(&self, duration: Duration) -> Result<Vec<DeviceRecord>, BleError> {
        self.scanner.scan(duration).await
    }

    /// Cancel an in-flight discovery pass.
    pub fn stop_scan(&self) {
        self.scanner.stop();
    }

    /// List adapter-known (bonded or cached) peripherals.
    pub async fn known_devices(&self) -> Result<Vec<DeviceRecord>, BleError> {
        self.scanner.known_devices().await
    }

    /// Connect to a specific device record.
    pub async fn connect(&self, target: &DeviceRecord) -> Result<(), BleError> {
        self.manager.connect(target).await
    }

    /// Scan for the first peripheral advertising the wallet service and
    /// connect to it.
    pub async fn connect_by_service(&self) -> Result<DeviceRecord, BleError> {
        let target = self
            .manager
            .scan_for_target(self.settings.connect_timeout())
            .await?;
        self.manager.connect(&target).await?;
        Ok(target)
    }

    /// Issue one JSON-RPC request on the established session.
    pub async fn send(&self, request: &str) -> Result<RpcOutcome, BleError> {
        if *self.manager.state_watch().borrow() != ConnectionState::Connected {
            return Err(BleError::NotConnected);
        }
        self.rpc.send(request).await
    }

    /// Ask the wallet which RPC methods it exposes.
    pub async fn list_methods(&self) -> Result<RpcOutcome, BleError> {
        self.send(r#"{"method":"listMethods"}"#).await
    }

    /// Fetch the wallet's status summary.
    pub async fn get_status(&self) -> Result<RpcOutcome, BleError> {
        self.send(r#"{"method":"getStatus"}"#).await
    }

    /// Tear the session down. Safe in any state.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    /// End the service: stop scanning and release any session.
    pub async fn close(&self) {
        self.stop_scan();
        self.disconnect().await;
    }

    // Observable surface.

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.state_watch()
    }

    pub fn discovered_devices(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.scanner.devices_watch()
    }

    pub fn known_devices_watch(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.scanner.known_devices_watch()
    }

    pub fn is_scanning(&self) -> watch::Receiver<bool> {
        self.scanner.scanning_watch()
    }

    pub fn messages(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }
}
