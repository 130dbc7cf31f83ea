//! # Trestle Core
//!
//! Format-independent core of the Trestle plugin bridge: the message
//! protocol spoken between a plugin editor and its processor, the state
//! machines on both ends of that protocol, and the traits a plugin
//! implements to sit behind them.
//!
//! ## Architecture
//!
//! ```text
//! Editor (implements Editor/UiDelegate)
//!        ↕ UiController          (editor side, sans-io)
//!     Message queue              (drained by the transport)
//!        ↕ PluginBridge          (processor side, sans-io)
//! Plugin (implements Plugin)
//! ```
//!
//! The COM transport lives in `trestle-vst3`; everything here is plain Rust
//! and unit-testable without a host.

pub mod bridge;
pub mod config;
pub mod error;
pub mod gui;
pub mod host;
pub mod message;
pub mod params;
pub mod plugin;

pub use bridge::{ReadySlot, UiController, UiDelegate, UiEvent};
pub use config::Config;
pub use error::{BridgeError, BridgeResult};
pub use gui::{Editor, Size};
pub use host::{HostDelegate, NullHostDelegate, PluginBridge};
pub use message::{AttributeSource, Message, Value};
pub use params::{BusInfo, ParameterInfo};
pub use plugin::Plugin;
