//! Bluetooth Module
//!
//! BLE transport for the Colibri wallet: discovery, the connection state
//! machine, and the JSON-RPC request/response channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       BleService                        │
//! │  (Main coordinator - public API for the application)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌───────────┐
//! │  Scanner  │  │ Connection │  │    Rpc    │
//! │           │  │            │  │           │
//! │ - BLE     │  │ - Session  │  │ - Request │
//! │   discovery│ │   lifecycle│  │   write   │
//! │ - Dedup   │  │ - Endpoint │  │ - Fragment│
//! │   by addr │  │   resolve  │  │   assembly│
//! └───────────┘  └────────────┘  └───────────┘
//!                       │             │
//!                       ▼             ▼
//!                ┌────────────┐  ┌───────────┐
//!                │  Protocol  │  │  Pending  │
//!                │ UUIDs, caps│  │ one-shot  │
//!                │  framing   │  │ op slots  │
//!                └────────────┘  └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Fixed identifiers, interop tables, tunables, and the
//!   response-completion detector
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - Session lifecycle, endpoint resolution, link watch
//! - [`rpc`] - Single-flight JSON-RPC channel
//! - [`pending`] - First-resolution-wins operation slots
//! - [`log`] - Timestamped diagnostic message stream
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod log;
pub mod pending;
pub mod protocol;
pub mod rpc;
pub mod scanner;
pub mod service;

// Re-export main service for convenience
pub use service::BleService;
