//! # Trestle
//!
//! Audio plugin framework with a message-bridged editor model.
//!
//! The DSP side implements [`trestle_core::Plugin`]; an optional editor
//! implements [`trestle_core::Editor`]. The two halves never call each
//! other directly: they exchange named, typed messages through the host's
//! connection-point transport, so the editor can live in another window,
//! process or toolkit without the DSP side noticing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trestle::prelude::*;
//!
//! #[derive(Default)]
//! struct MyGain { gain_db: f32, sample_rate: f64 }
//!
//! impl Plugin for MyGain {
//!     fn parameters(&self) -> &'static [ParameterInfo] { &PARAMETERS }
//!     // ...
//!     fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
//!         // Your DSP here
//!     }
//! }
//!
//! static CONFIG: Config = Config::new("MyGain").with_vendor("My Company");
//! static VST3_CONFIG: Vst3Config = Vst3Config::new("...uuid...");
//! export_vst3!(CONFIG, VST3_CONFIG, MyGain);
//! ```

// Re-export sub-crates
pub use trestle_core as core;

#[cfg(feature = "vst3")]
pub use trestle_vst3 as vst3_impl;

/// Re-export of vst3 types needed for plugin configuration.
///
/// Lets plugins use `trestle::vst3::{uid, Steinberg}` without a direct
/// dependency on the vst3 crate.
#[cfg(feature = "vst3")]
pub mod vst3 {
    pub use ::vst3::{uid, Steinberg};
}

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use trestle::prelude::*;
/// ```
pub mod prelude {
    pub use trestle_core::{
        // Plugin metadata
        Config,
        // Parameter and bus descriptors
        BusInfo, ParameterInfo,
        // Traits
        Editor, Plugin, UiDelegate,
        // Bridge protocol types
        AttributeSource, BridgeError, BridgeResult, HostDelegate, Message, NullHostDelegate,
        PluginBridge, UiController, UiEvent, Value,
        // Geometry
        Size,
    };

    // VST3 implementation (only when feature enabled)
    #[cfg(feature = "vst3")]
    pub use trestle_vst3::{export_vst3, BridgeProcessor, Vst3Config};
}
