//! VST3 plugin factory.
//!
//! Generic factory exposing one combined component class.

use std::ffi::c_void;
use std::marker::PhantomData;

use trestle_core::Config;
use vst3::com_scrape_types::MakeHeader;
use vst3::{Class, ComWrapper, Steinberg::*};

use crate::util::{copy_cstring, copy_wstring};
use crate::wrapper::Vst3Config;

/// Trait implemented by component types the factory can construct.
pub trait ComponentFactory: Class {
    fn create(config: &'static Config, vst3_config: &'static Vst3Config) -> Self;
}

/// VST3 plugin factory, generic over the component type.
pub struct Factory<C> {
    config: &'static Config,
    vst3_config: &'static Vst3Config,
    _marker: PhantomData<C>,
}

impl<C> Factory<C> {
    pub const fn new(config: &'static Config, vst3_config: &'static Vst3Config) -> Self {
        Self {
            config,
            vst3_config,
            _marker: PhantomData,
        }
    }
}

impl<C> Class for Factory<C>
where
    C: ComponentFactory + 'static,
    C::Interfaces: MakeHeader<C, ComWrapper<C>>,
{
    type Interfaces = (IPluginFactory3,);
}

#[allow(non_snake_case)]
impl<C> IPluginFactoryTrait for Factory<C>
where
    C: ComponentFactory + 'static,
    C::Interfaces: MakeHeader<C, ComWrapper<C>>,
{
    unsafe fn getFactoryInfo(&self, info: *mut PFactoryInfo) -> tresult {
        if info.is_null() {
            return kInvalidArgument;
        }

        // SAFETY: info is non-null (checked above).
        let info = unsafe { &mut *info };
        copy_cstring(self.config.vendor, &mut info.vendor);
        copy_cstring(self.config.url, &mut info.url);
        copy_cstring(self.config.email, &mut info.email);
        info.flags = PFactoryInfo_::FactoryFlags_::kUnicode as int32;
        kResultOk
    }

    unsafe fn countClasses(&self) -> i32 {
        1
    }

    unsafe fn getClassInfo(&self, index: i32, info: *mut PClassInfo) -> tresult {
        if info.is_null() || index != 0 {
            return kInvalidArgument;
        }

        // SAFETY: info is non-null (checked above).
        let info = unsafe { &mut *info };
        info.cid = self.vst3_config.component_uid;
        info.cardinality = PClassInfo_::ClassCardinality_::kManyInstances as int32;
        copy_cstring("Audio Module Class", &mut info.category);
        copy_cstring(self.config.name, &mut info.name);
        kResultOk
    }

    unsafe fn createInstance(
        &self,
        cid: FIDString,
        iid: FIDString,
        obj: *mut *mut c_void,
    ) -> tresult {
        if cid.is_null() || iid.is_null() || obj.is_null() {
            return kInvalidArgument;
        }

        // SAFETY: cid points to a TUID provided by the host.
        let requested_cid = unsafe { &*(cid as *const TUID) };
        if *requested_cid != self.vst3_config.component_uid {
            return kInvalidArgument;
        }

        let component = ComWrapper::new(C::create(self.config, self.vst3_config));
        let Some(unknown) = component.as_com_ref::<FUnknown>() else {
            return kNoInterface;
        };
        let ptr = unknown.as_ptr();
        // SAFETY: ptr is a valid FUnknown and iid points to a TUID.
        unsafe { ((*(*ptr).vtbl).queryInterface)(ptr, iid as *const TUID, obj) }
    }
}

#[allow(non_snake_case)]
impl<C> IPluginFactory2Trait for Factory<C>
where
    C: ComponentFactory + 'static,
    C::Interfaces: MakeHeader<C, ComWrapper<C>>,
{
    unsafe fn getClassInfo2(&self, index: i32, info: *mut PClassInfo2) -> tresult {
        if info.is_null() || index != 0 {
            return kInvalidArgument;
        }

        // SAFETY: info is non-null (checked above).
        let info = unsafe { &mut *info };
        info.cid = self.vst3_config.component_uid;
        info.cardinality = PClassInfo_::ClassCardinality_::kManyInstances as int32;
        copy_cstring("Audio Module Class", &mut info.category);
        copy_cstring(self.config.name, &mut info.name);
        info.classFlags = 0;
        copy_cstring(self.vst3_config.sub_categories, &mut info.subCategories);
        copy_cstring(self.config.vendor, &mut info.vendor);
        copy_cstring(self.config.version, &mut info.version);
        copy_cstring("VST 3.8.0", &mut info.sdkVersion);
        kResultOk
    }
}

#[allow(non_snake_case)]
impl<C> IPluginFactory3Trait for Factory<C>
where
    C: ComponentFactory + 'static,
    C::Interfaces: MakeHeader<C, ComWrapper<C>>,
{
    unsafe fn getClassInfoUnicode(&self, index: i32, info: *mut PClassInfoW) -> tresult {
        if info.is_null() || index != 0 {
            return kInvalidArgument;
        }

        // SAFETY: info is non-null (checked above).
        let info = unsafe { &mut *info };
        info.cid = self.vst3_config.component_uid;
        info.cardinality = PClassInfo_::ClassCardinality_::kManyInstances as int32;
        copy_cstring("Audio Module Class", &mut info.category);
        copy_wstring(self.config.name, &mut info.name);
        info.classFlags = 0;
        copy_cstring(self.vst3_config.sub_categories, &mut info.subCategories);
        copy_wstring(self.config.vendor, &mut info.vendor);
        copy_wstring(self.config.version, &mut info.version);
        copy_wstring("VST 3.8.0", &mut info.sdkVersion);
        kResultOk
    }

    unsafe fn setHostContext(&self, _context: *mut FUnknown) -> tresult {
        kResultOk
    }
}
