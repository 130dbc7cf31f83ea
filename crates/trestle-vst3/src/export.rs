//! VST3 export macro and entry points.

/// Generate the VST3 entry points for a plugin.
///
/// Expands to the platform module entry points and the `GetPluginFactory`
/// function the host looks up. The plugin is exposed as a combined
/// component (processor and controller in one object).
///
/// # Arguments
///
/// * `$config` - A static [`trestle_core::Config`] with the plugin metadata
/// * `$vst3_config` - A static [`Vst3Config`](crate::Vst3Config) with the class UID
/// * `$plugin` - The plugin type implementing [`trestle_core::Plugin`] and `Default`
///
/// # Example
///
/// ```rust,ignore
/// use trestle_core::Config;
/// use trestle_vst3::{export_vst3, Vst3Config};
///
/// static CONFIG: Config = Config::new("My Splitter").with_vendor("My Company");
/// static VST3_CONFIG: Vst3Config =
///     Vst3Config::new("DCDDB4BA-2D6A-4EC3-A526-D3E7244FAAE3").with_categories("Fx|Filter");
///
/// export_vst3!(CONFIG, VST3_CONFIG, MySplitter);
/// ```
#[macro_export]
macro_rules! export_vst3 {
    ($config:expr, $vst3_config:expr, $plugin:ty) => {
        #[cfg(target_os = "windows")]
        #[no_mangle]
        extern "system" fn InitDll() -> bool {
            true
        }

        #[cfg(target_os = "windows")]
        #[no_mangle]
        extern "system" fn ExitDll() -> bool {
            true
        }

        // Must be lowercase on macOS.
        #[cfg(target_os = "macos")]
        #[no_mangle]
        extern "system" fn bundleEntry(_bundle_ref: *mut std::ffi::c_void) -> bool {
            true
        }

        #[cfg(target_os = "macos")]
        #[no_mangle]
        extern "system" fn bundleExit() -> bool {
            true
        }

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        #[no_mangle]
        extern "system" fn ModuleEntry(_shared_library_handle: *mut std::ffi::c_void) -> bool {
            true
        }

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        #[no_mangle]
        extern "system" fn ModuleExit() -> bool {
            true
        }

        #[no_mangle]
        extern "system" fn GetPluginFactory() -> *mut std::ffi::c_void {
            use $crate::vst3::ComWrapper;
            use $crate::{BridgeProcessor, Factory};

            let factory =
                Factory::<BridgeProcessor<$plugin>>::new(&$config, &$vst3_config);
            let wrapper = ComWrapper::new(factory);

            match wrapper.to_com_ptr::<$crate::vst3::Steinberg::IPluginFactory>() {
                Some(ptr) => ptr.into_raw() as *mut std::ffi::c_void,
                None => std::ptr::null_mut(),
            }
        }
    };
}
