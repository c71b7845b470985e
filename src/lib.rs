//! BLE transport for the Colibri hardware wallet.
//!
//! Scans for the wallet, drives a single GATT session from discovered to
//! RPC-ready, and runs one JSON-RPC exchange at a time over the wallet's
//! write/notify characteristic pair. Responses arrive as unframed
//! notification fragments; completion is inferred from brace/bracket
//! balance.
//!
//! Entry point is [`BleService`]: open it, scan or connect, call
//! [`BleService::send`], and subscribe to the connection state and message
//! log for everything worth showing a user.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{ConnectionState, DeviceRecord, SignalStrength};
pub use domain::settings::{LinkSettings, LogSettings, SettingsService};
pub use error::BleError;
pub use infrastructure::bluetooth::rpc::RpcOutcome;
pub use infrastructure::bluetooth::BleService;
