//! # trestle-vst3
//!
//! VST3 layer for the Trestle plugin framework.
//!
//! Wraps `trestle-core` traits into VST3 COM interfaces:
//!
//! - Plugin factory (IPluginFactory, IPluginFactory2, IPluginFactory3)
//! - Combined component wrapper ([`BridgeProcessor`])
//! - Plug view hosting the editor ([`view::BridgeView`])
//! - Platform entry points via [`export_vst3!`]
//!
//! ## Architecture
//!
//! Processor and controller are one object (the combined component
//! pattern). The editor runs behind an IPlugView and talks to the
//! processor exclusively through IConnectionPoint messages:
//!
//! ```text
//! User Plugin (implements trestle_core::Plugin)
//!        |
//! BridgeProcessor<P> --- IConnectionPoint messages --- BridgeView
//!        |                                                 |
//! VST3 COM interfaces                         Editor (trestle_core::Editor)
//! ```

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]

pub mod export;
pub mod factory;
pub mod processor;
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
mod timer;
mod transport;
pub mod util;
pub mod view;
pub mod wrapper;

pub use factory::{ComponentFactory, Factory};
pub use processor::BridgeProcessor;
pub use view::BridgeView;
pub use wrapper::Vst3Config;

// Re-export shared types from trestle-core
pub use trestle_core::Config;

// Re-export the vst3 crate for use in macros and UIDs
pub use vst3;
