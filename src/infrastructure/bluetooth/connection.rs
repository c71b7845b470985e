//! BLE Connection Module
//!
//! Owns the lifecycle of the single wallet session: link establishment,
//! transfer-unit preference, service discovery, endpoint resolution, and
//! teardown. Only this module transitions the connection state.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CharPropFlags, Characteristic, Peripheral as _,
    ScanFilter, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::domain::models::{ConnectionState, DeviceRecord};
use crate::error::BleError;
use crate::infrastructure::bluetooth::log::MessageLog;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::rpc::{RequestSink, RpcChannel};
use crate::infrastructure::bluetooth::scanner::record_from_peripheral;

/// Configuration for connection behavior.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Service to locate during capability discovery.
    pub service_uuid: uuid::Uuid,
    /// Request (write) characteristic within the service.
    pub write_char_uuid: uuid::Uuid,
    /// Response (notify) characteristic within the service.
    pub notify_char_uuid: uuid::Uuid,
    /// Deadline covering link-up, transfer unit, and discovery together.
    pub connect_timeout: Duration,
    /// Preferred transfer unit; the granted size may be smaller.
    pub requested_mtu: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            service_uuid: protocol::COLIBRI_SERVICE_UUID,
            write_char_uuid: protocol::write_char_uuid(),
            notify_char_uuid: protocol::notify_char_uuid(),
            connect_timeout: protocol::CONNECT_TIMEOUT,
            requested_mtu: protocol::REQUESTED_MTU,
        }
    }
}

/// The two resolved communication endpoints plus the link they live on.
#[derive(Debug, Clone)]
pub(crate) struct Endpoints {
    pub peripheral: Peripheral,
    pub write_char: Characteristic,
    pub notify_char: Characteristic,
}

pub(crate) type SharedEndpoints = Arc<RwLock<Option<Endpoints>>>;

/// Holder of the session and the published connection state.
///
/// The endpoints slot is the session's single owner; the RPC sink only ever
/// reads it. Clearing the slot, stopping the router, and publishing the
/// next state all go through [`close`](Self::close), which is safe to call
/// in any state, any number of times.
pub(crate) struct SessionGuard {
    endpoints: SharedEndpoints,
    router: Mutex<Option<JoinHandle<()>>>,
    state_tx: watch::Sender<ConnectionState>,
    log: MessageLog,
}

impl SessionGuard {
    pub fn new(log: MessageLog) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Arc::new(RwLock::new(None)),
            router: Mutex::new(None),
            state_tx: watch::Sender::new(ConnectionState::Disconnected),
            log,
        })
    }

    pub fn endpoints(&self) -> SharedEndpoints {
        self.endpoints.clone()
    }

    pub fn has_session(&self) -> bool {
        self.endpoints.read().unwrap().is_some()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn set_state(&self, state: ConnectionState) {
        let description = state.to_string();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            self.log.publish(format!("Connection state: {description}"));
        }
    }

    /// Release the session (if any) and publish `next_state`.
    pub async fn close(&self, next_state: ConnectionState) {
        let endpoints = self.endpoints.write().unwrap().take();
        if let Some(endpoints) = endpoints {
            if let Err(err) = endpoints.peripheral.disconnect().await {
                warn!("Error while releasing link: {err}");
            }
        }
        // Stopped last so a router running this very teardown finishes it.
        if let Some(router) = self.router.lock().unwrap().take() {
            router.abort();
        }
        self.set_state(next_state);
    }

    /// Teardown for an unsolicited link drop: the in-flight RPC call (if
    /// any) fails, the session is released, and the state records why.
    pub async fn fail_link(&self, rpc: &RpcChannel, reason: &str) {
        rpc.fail_inflight(BleError::LinkFailed(reason.to_string()));
        self.close(ConnectionState::Failed(reason.to_string())).await;
    }

    fn install(&self, endpoints: Endpoints, router: JoinHandle<()>) {
        *self.endpoints.write().unwrap() = Some(endpoints);
        *self.router.lock().unwrap() = Some(router);
    }
}

/// Request sink backed by whatever session is currently installed.
pub(crate) struct SessionSink {
    endpoints: SharedEndpoints,
}

impl SessionSink {
    pub fn new(endpoints: SharedEndpoints) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl RequestSink for SessionSink {
    async fn write_request(&self, payload: &[u8]) -> Result<(), BleError> {
        let target = {
            let guard = self.endpoints.read().unwrap();
            guard
                .as_ref()
                .map(|ep| (ep.peripheral.clone(), ep.write_char.clone()))
        };
        let Some((peripheral, characteristic)) = target else {
            return Err(BleError::NotConnected);
        };
        peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await
            .map_err(|err| BleError::WriteFailed(err.to_string()))
    }
}

/// BLE connection handler.
pub struct ConnectionManager {
    adapter: Adapter,
    config: ConnectionConfig,
    guard: Arc<SessionGuard>,
    rpc: Arc<RpcChannel>,
    // Serializes connect/disconnect so at most one session ever exists.
    lifecycle: tokio::sync::Mutex<()>,
    log: MessageLog,
}

impl ConnectionManager {
    pub(crate) fn new(
        adapter: Adapter,
        config: ConnectionConfig,
        guard: Arc<SessionGuard>,
        rpc: Arc<RpcChannel>,
        log: MessageLog,
    ) -> Self {
        Self {
            adapter,
            config,
            guard,
            rpc,
            lifecycle: tokio::sync::Mutex::new(()),
            log,
        }
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.guard.state_watch()
    }

    /// Scan for the first peripheral advertising the wallet service.
    pub async fn scan_for_target(&self, scan_timeout: Duration) -> Result<DeviceRecord, BleError> {
        self.log.publish("Scanning for wallet device...");
        let mut events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter {
                services: vec![self.config.service_uuid],
            })
            .await?;

        let found = timeout(scan_timeout, async {
            while let Some(event) = events.next().await {
                let id = match &event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };
                let Ok(peripheral) = self.adapter.peripheral(id).await else {
                    continue;
                };
                if let Some(record) = record_from_peripheral(&peripheral).await {
                    if record.advertises_wallet_service() {
                        return Some(record);
                    }
                }
            }
            None
        })
        .await;

        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Failed to stop target scan: {err}");
        }

        match found {
            Ok(Some(record)) => {
                self.log.publish(format!(
                    "Found wallet device {} ({})",
                    record.display_name(),
                    record.address
                ));
                Ok(record)
            }
            Ok(None) | Err(_) => {
                self.log.publish("Device not found");
                Err(BleError::NotFound)
            }
        }
    }

    /// Establish a session with `target` and resolve both endpoints.
    ///
    /// Any prior session is torn down first. On success the state is
    /// `Connected`; on any failure it is `Failed(reason)` and no session
    /// remains installed.
    pub async fn connect(&self, target: &DeviceRecord) -> Result<(), BleError> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.guard.has_session() {
            self.log
                .publish("Already connected to a device, disconnecting first...");
            self.guard.close(ConnectionState::Disconnected).await;
        }

        self.log.publish(format!(
            "Starting connection to {} ({})",
            target.display_name(),
            target.address
        ));
        self.guard.set_state(ConnectionState::Connecting);
        self.log.publish("Initiating GATT connection...");

        match timeout(self.config.connect_timeout, self.establish(target)).await {
            Ok(Ok(())) => {
                self.guard.set_state(ConnectionState::Connected);
                self.log
                    .publish("All required characteristics found - connection ready!");
                Ok(())
            }
            Ok(Err(err)) => {
                self.guard
                    .close(ConnectionState::Failed(err.to_string()))
                    .await;
                Err(err)
            }
            Err(_) => {
                // The establish future was dropped mid-flight; make sure a
                // half-open link does not linger.
                if let Ok(peripheral) = self.find_peripheral(&target.address).await {
                    let _ = peripheral.disconnect().await;
                }
                self.guard
                    .close(ConnectionState::Failed("connect timed out".into()))
                    .await;
                Err(BleError::Timeout { partial_bytes: 0 })
            }
        }
    }

    async fn establish(&self, target: &DeviceRecord) -> Result<(), BleError> {
        let peripheral = self.find_peripheral(&target.address).await?;

        self.log.publish(format!(
            "Attempting to connect to device: {}",
            target.address
        ));
        peripheral
            .connect()
            .await
            .map_err(|err| BleError::LinkFailed(err.to_string()))?;
        info!("Link established to {}", target.address);

        // The host stack negotiates the ATT transfer unit on its own; there
        // is no client-side request hook, so record the preference and
        // proceed with whatever gets granted.
        self.log.publish(format!(
            "GATT connection established, requesting {}-byte transfer unit (stack negotiates the final size)",
            self.config.requested_mtu
        ));

        self.log.publish("Discovering services...");
        peripheral
            .discover_services()
            .await
            .map_err(|err| BleError::LinkFailed(err.to_string()))?;

        let service = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == self.config.service_uuid);
        let Some(service) = service else {
            self.log.publish("Wallet service not found on device");
            let _ = peripheral.disconnect().await;
            return Err(BleError::NotFound);
        };
        self.log
            .publish("Wallet service found! Looking for characteristics...");

        let mut write_char = None;
        let mut notify_char = None;
        for characteristic in &service.characteristics {
            self.log
                .publish(format!("Found characteristic: {}", characteristic.uuid));
            if characteristic.uuid == self.config.write_char_uuid
                && characteristic
                    .properties
                    .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
            {
                write_char = Some(characteristic.clone());
                self.log.publish("Write characteristic configured");
            } else if characteristic.uuid == self.config.notify_char_uuid
                && characteristic.properties.contains(CharPropFlags::NOTIFY)
            {
                notify_char = Some(characteristic.clone());
            }
        }

        let (write_char, notify_char) = match (write_char, notify_char) {
            (Some(w), Some(n)) => (w, n),
            (w, n) => {
                let mut missing = Vec::new();
                if w.is_none() {
                    missing.push("write");
                }
                if n.is_none() {
                    missing.push("notify");
                }
                let missing = missing.join(", ");
                self.log
                    .publish(format!("Missing characteristics: {missing}"));
                let _ = peripheral.disconnect().await;
                return Err(BleError::CharacteristicsMissing(missing));
            }
        };

        self.log
            .publish("Notify characteristic found, enabling notifications...");
        // Subscribing writes the enable value to the standard configuration
        // descriptor (protocol::CCCD_UUID) on our behalf.
        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|err| BleError::LinkFailed(format!("enabling notifications: {err}")))?;
        self.log.publish("Notification descriptor enabled");

        let router = self.spawn_router(peripheral.clone());
        self.guard.install(
            Endpoints {
                peripheral,
                write_char,
                notify_char,
            },
            router,
        );
        Ok(())
    }

    /// Route notification fragments to the RPC channel and watch for an
    /// unsolicited link drop. One router runs per session.
    fn spawn_router(&self, peripheral: Peripheral) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let guard = self.guard.clone();
        let rpc = self.rpc.clone();
        let log = self.log.clone();
        let notify_uuid = self.config.notify_char_uuid;
        let device_id = peripheral.id();

        tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(err) => {
                    log.publish(format!("Notification stream unavailable: {err}"));
                    guard.fail_link(&rpc, "notification stream unavailable").await;
                    return;
                }
            };
            let mut events = match adapter.events().await {
                Ok(stream) => stream,
                Err(err) => {
                    log.publish(format!("Adapter event stream unavailable: {err}"));
                    guard.fail_link(&rpc, "adapter events unavailable").await;
                    return;
                }
            };

            loop {
                tokio::select! {
                    notification = notifications.next() => {
                        match notification {
                            Some(n) if n.uuid == notify_uuid => rpc.handle_fragment(&n.value),
                            Some(_) => {}
                            None => {
                                log.publish("Device disconnected");
                                guard.fail_link(&rpc, "disconnected").await;
                                break;
                            }
                        }
                    }
                    event = events.next() => {
                        match event {
                            Some(CentralEvent::DeviceDisconnected(id)) if id == device_id => {
                                log.publish("Device disconnected");
                                guard.fail_link(&rpc, "disconnected").await;
                                break;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
        })
    }

    /// Always safe to call; always ends with `Disconnected` and no session.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.guard.close(ConnectionState::Disconnected).await;
        self.log.publish("Disconnected from device");
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, BleError> {
        let peripherals = self.adapter.peripherals().await?;
        peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
            .ok_or(BleError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::rpc::RpcOutcome;

    struct NullSink;

    #[async_trait]
    impl RequestSink for NullSink {
        async fn write_request(&self, _payload: &[u8]) -> Result<(), BleError> {
            Ok(())
        }
    }

    fn rpc(log: &MessageLog) -> Arc<RpcChannel> {
        Arc::new(RpcChannel::new(
            Arc::new(NullSink),
            Duration::from_millis(500),
            8192,
            log.clone(),
        ))
    }

    #[tokio::test]
    async fn close_is_idempotent_from_any_state() {
        let guard = SessionGuard::new(MessageLog::new(16));
        let state = guard.state_watch();

        // Never connected: closing must not error and must end Disconnected.
        guard.close(ConnectionState::Disconnected).await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);

        // And again, straight after.
        guard.close(ConnectionState::Disconnected).await;
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
        assert!(!guard.has_session());
    }

    #[tokio::test]
    async fn state_transitions_are_published_to_watchers() {
        let guard = SessionGuard::new(MessageLog::new(16));
        let mut state = guard.state_watch();

        guard.set_state(ConnectionState::Connecting);
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connecting);

        guard.set_state(ConnectionState::Failed("no endpoints".into()));
        assert_eq!(
            *state.borrow_and_update(),
            ConnectionState::Failed("no endpoints".into())
        );
    }

    #[tokio::test]
    async fn repeated_set_state_does_not_republish() {
        let guard = SessionGuard::new(MessageLog::new(16));
        let mut state = guard.state_watch();
        state.borrow_and_update();

        guard.set_state(ConnectionState::Connecting);
        state.borrow_and_update();
        guard.set_state(ConnectionState::Connecting);
        assert!(!state.has_changed().unwrap());
    }

    #[tokio::test]
    async fn link_drop_fails_the_inflight_call_and_state() {
        let log = MessageLog::new(32);
        let guard = SessionGuard::new(log.clone());
        let rpc = rpc(&log);

        let call = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        guard.fail_link(&rpc, "disconnected").await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, BleError::LinkFailed(_)));
        assert_eq!(
            *guard.state_watch().borrow(),
            ConnectionState::Failed("disconnected".into())
        );

        // The channel is usable again once a new session resolves calls.
        let next = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{}");
        assert_eq!(
            next.await.unwrap().unwrap(),
            RpcOutcome::Complete("{}".into())
        );
    }

    #[test]
    fn default_config_uses_the_fixed_identifiers() {
        let config = ConnectionConfig::default();
        assert_eq!(config.service_uuid, protocol::COLIBRI_SERVICE_UUID);
        assert_eq!(
            config.write_char_uuid.to_string(),
            "31421927-5358-9793-2384-626433832795"
        );
        assert_eq!(
            config.notify_char_uuid.to_string(),
            "31421926-5358-9793-2384-626433832795"
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.requested_mtu, 512);
    }
}
