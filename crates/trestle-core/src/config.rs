//! Plugin configuration.
//!
//! Shared plugin metadata, declared once as a `'static` and handed to the
//! format wrappers.
//!
//! # Example
//!
//! ```ignore
//! use trestle_core::Config;
//!
//! pub static CONFIG: Config = Config::new("My Splitter")
//!     .with_vendor("My Company")
//!     .with_version("1.0.0");
//! ```

/// Format-independent plugin metadata.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub name: &'static str,
    pub vendor: &'static str,
    pub url: &'static str,
    pub email: &'static str,
    pub version: &'static str,
}

impl Config {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            vendor: "",
            url: "",
            email: "",
            version: "0.1.0",
        }
    }

    pub const fn with_vendor(mut self, vendor: &'static str) -> Self {
        self.vendor = vendor;
        self
    }

    pub const fn with_url(mut self, url: &'static str) -> Self {
        self.url = url;
        self
    }

    pub const fn with_email(mut self, email: &'static str) -> Self {
        self.email = email;
        self
    }

    pub const fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }
}
