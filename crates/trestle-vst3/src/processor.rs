//! Combined VST3 component wrapping a [`Plugin`].
//!
//! [`BridgeProcessor`] implements processor and controller in one object
//! (IComponent, IAudioProcessor and IEditController on the same class),
//! plus an IConnectionPoint endpoint carrying the editor protocol.
//!
//! Raw automation indices put the program slot first: index 0 selects the
//! program when the plugin has any, plugin parameters follow at
//! `parameter_offset()`. The same indexing is used on the wire, so editor
//! messages and host automation agree on what a `rindex` means.

use std::cell::{Cell, UnsafeCell};
use std::ffi::{c_void, CStr};
use std::rc::Rc;
use std::slice;

use trestle_core::{
    Config, HostDelegate, ParameterInfo as CoreParameterInfo, Plugin, PluginBridge,
};
use vst3::{Class, ComPtr, ComRef, ComWrapper, Steinberg::Vst::*, Steinberg::*};

use crate::factory::ComponentFactory;
use crate::transport::{result_to_tresult, MessageEndpoint, Vst3Attributes};
use crate::util::{com_addref, com_release, copy_wstring, len_wstring};
use crate::view::BridgeView;
use crate::wrapper::Vst3Config;

// Upper bound on channel slices collected per process call.
const MAX_CHANNELS_PER_BUS: usize = 8;
const MAX_BUSES: usize = 4;
const MAX_PROCESS_CHANNELS: usize = MAX_CHANNELS_PER_BUS * MAX_BUSES;

/// Serialized state layout version.
const STATE_VERSION: u32 = 1;

/// Serialize program index and plain parameter values.
fn encode_state(program: u32, values: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + values.len() * 4);
    buf.extend_from_slice(&STATE_VERSION.to_le_bytes());
    buf.extend_from_slice(&program.to_le_bytes());
    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for value in values {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Parse a state blob produced by [`encode_state`].
fn decode_state(buf: &[u8]) -> Option<(u32, Vec<f32>)> {
    fn read_u32(buf: &[u8], pos: &mut usize) -> Option<u32> {
        let bytes = buf.get(*pos..*pos + 4)?;
        *pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    let mut pos = 0;
    if read_u32(buf, &mut pos)? != STATE_VERSION {
        return None;
    }
    let program = read_u32(buf, &mut pos)?;
    let count = read_u32(buf, &mut pos)? as usize;
    // A corrupt blob may declare any count; bound it by the bytes actually
    // present before reserving.
    if count.checked_mul(4)? > buf.len() - pos {
        return None;
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = read_u32(buf, &mut pos)?;
        values.push(f32::from_bits(raw));
    }
    Some((program, values))
}

/// Convert a channel count to the matching VST3 speaker arrangement.
fn channel_count_to_speaker_arrangement(channel_count: u32) -> SpeakerArrangement {
    match channel_count {
        1 => SpeakerArr::kMono,
        2 => SpeakerArr::kStereo,
        n => (1u64 << n) - 1,
    }
}

/// Forwards bridge side effects to the host's IComponentHandler.
struct HandlerForwarder {
    handler: *mut IComponentHandler,
    parameters: &'static [CoreParameterInfo],
    parameter_offset: u32,
}

impl HostDelegate for HandlerForwarder {
    fn edit_started(&mut self, index: u32) {
        if self.handler.is_null() {
            return;
        }
        // SAFETY: the handler was AddRef'd in setComponentHandler and stays
        // alive until replaced or released.
        let _ = unsafe {
            ((*(*self.handler).vtbl).beginEdit)(self.handler, self.parameter_offset + index)
        };
    }

    fn edit_ended(&mut self, index: u32) {
        if self.handler.is_null() {
            return;
        }
        // SAFETY: see edit_started.
        let _ = unsafe {
            ((*(*self.handler).vtbl).endEdit)(self.handler, self.parameter_offset + index)
        };
    }

    fn parameter_performed(&mut self, index: u32, value: f32) {
        if self.handler.is_null() {
            return;
        }
        let Some(info) = self.parameters.get(index as usize) else {
            return;
        };
        // SAFETY: see edit_started.
        let _ = unsafe {
            ((*(*self.handler).vtbl).performEdit)(
                self.handler,
                self.parameter_offset + index,
                info.normalize(value),
            )
        };
    }

    fn note_received(&mut self, channel: u8, note: u8, velocity: u8) {
        // Editor notes have no host-side event path outside process().
        log::debug!("vst3: editor note ch={channel} note={note} vel={velocity}");
    }
}

/// IConnectionPoint forwarder handed to the view as its peer.
///
/// The processor cannot name its own COM identity from `&self`, so the view
/// talks to this small endpoint instead, which forwards into the processor
/// through a raw back-pointer. The shared `valid` flag is cleared when the
/// processor goes away.
struct ProcessorEndpoint<P: Plugin> {
    processor: *const BridgeProcessor<P>,
    valid: Rc<Cell<bool>>,
}

// SAFETY: connection point traffic stays on the host's main thread; the
// endpoint is never touched from any other thread.
unsafe impl<P: Plugin> Send for ProcessorEndpoint<P> {}
// SAFETY: see Send impl above.
unsafe impl<P: Plugin> Sync for ProcessorEndpoint<P> {}

impl<P: Plugin> Class for ProcessorEndpoint<P> {
    type Interfaces = (IConnectionPoint,);
}

#[allow(non_snake_case)]
impl<P: Plugin> IConnectionPointTrait for ProcessorEndpoint<P> {
    unsafe fn connect(&self, _other: *mut IConnectionPoint) -> tresult {
        kResultOk
    }

    unsafe fn disconnect(&self, _other: *mut IConnectionPoint) -> tresult {
        kResultOk
    }

    unsafe fn notify(&self, message: *mut IMessage) -> tresult {
        if !self.valid.get() {
            log::warn!("vst3: message after processor teardown");
            return kNotInitialized;
        }
        // SAFETY: while valid is set, the processor that created this
        // endpoint is alive.
        unsafe { (*self.processor).on_peer_message(message) }
    }
}

/// The combined VST3 component.
pub struct BridgeProcessor<P: Plugin> {
    plugin: UnsafeCell<P>,
    bridge: UnsafeCell<PluginBridge>,
    host: UnsafeCell<Option<ComPtr<IHostApplication>>>,
    /// Peer connected by the host through IConnectionPoint.
    peer: UnsafeCell<Option<ComPtr<IConnectionPoint>>>,
    /// Connection point of the live view, wired in createView. Preferred
    /// over `peer` when draining editor-bound messages.
    view_peer: UnsafeCell<Option<ComPtr<IConnectionPoint>>>,
    /// Validity flag shared with the endpoint handed to the view.
    endpoint_valid: UnsafeCell<Option<Rc<Cell<bool>>>>,
    handler: UnsafeCell<*mut IComponentHandler>,
}

// SAFETY: the plugin is Send, and VST3 guarantees the UnsafeCell contents
// are only touched from single-threaded contexts (main thread for the
// controller surface, one audio thread for process).
unsafe impl<P: Plugin> Send for BridgeProcessor<P> {}
// SAFETY: see Send impl above; overlapping calls are excluded by the VST3
// threading contract.
unsafe impl<P: Plugin> Sync for BridgeProcessor<P> {}

impl<P: Plugin + Default> BridgeProcessor<P> {
    pub fn new() -> Self {
        let plugin = P::default();
        let bridge = PluginBridge::new(
            plugin.parameters().len(),
            plugin.parameter_offset(),
            plugin.programs().len() as u32,
        );
        Self {
            plugin: UnsafeCell::new(plugin),
            bridge: UnsafeCell::new(bridge),
            host: UnsafeCell::new(None),
            peer: UnsafeCell::new(None),
            view_peer: UnsafeCell::new(None),
            endpoint_valid: UnsafeCell::new(None),
            handler: UnsafeCell::new(std::ptr::null_mut()),
        }
    }
}

impl<P: Plugin + Default> Default for BridgeProcessor<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Plugin> BridgeProcessor<P> {
    /// # Safety
    ///
    /// Must only be called while no mutable reference exists.
    #[inline]
    unsafe fn plugin(&self) -> &P {
        // SAFETY: guaranteed by the caller.
        unsafe { &*self.plugin.get() }
    }

    /// # Safety
    ///
    /// Must only be called from contexts where VST3 guarantees
    /// single-threaded access.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn plugin_mut(&self) -> &mut P {
        // SAFETY: guaranteed by the caller.
        unsafe { &mut *self.plugin.get() }
    }

    fn parameter_offset(&self) -> u32 {
        // SAFETY: shared read of static plugin metadata.
        unsafe { self.plugin() }.parameter_offset()
    }

    fn program_count(&self) -> u32 {
        // SAFETY: shared read of static plugin metadata.
        unsafe { self.plugin() }.programs().len() as u32
    }

    /// Dispatch one editor message into the bridge, then flush replies.
    fn on_peer_message(&self, message: *mut IMessage) -> tresult {
        // SAFETY: message is a valid COM pointer or null.
        let Some(message) = (unsafe { ComRef::from_raw(message) }) else {
            return kInvalidArgument;
        };

        // SAFETY: the id string is owned by the message for this call.
        let id_ptr = unsafe { message.getMessageID() };
        if id_ptr.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: as above.
        let Ok(id) = unsafe { CStr::from_ptr(id_ptr) }.to_str() else {
            return kInvalidArgument;
        };
        let id = id.to_owned();

        // SAFETY: the attribute list is owned by the message.
        let Some(attrs) = (unsafe { ComRef::from_raw(message.getAttributes()) }) else {
            return kInvalidArgument;
        };
        let attrs = Vst3Attributes::new(attrs);

        let result = {
            // SAFETY: connection point traffic runs on the main thread; the
            // borrows end before drain_outbox below.
            let plugin = unsafe { self.plugin_mut() };
            let mut forwarder = HandlerForwarder {
                // SAFETY: as above.
                handler: unsafe { *self.handler.get() },
                parameters: plugin.parameters(),
                parameter_offset: plugin.parameter_offset(),
            };
            // SAFETY: as above; bridge and plugin are distinct cells.
            let bridge = unsafe { &mut *self.bridge.get() };
            bridge.handle(&id, &attrs, plugin, &mut forwarder)
        };

        self.drain_outbox();
        result_to_tresult(result)
    }

    /// Flush queued editor-bound messages to the view (or the host peer).
    ///
    /// The bridge borrow is released between popping and sending: the view
    /// handles each message synchronously and its reply path re-enters
    /// [`on_peer_message`](Self::on_peer_message).
    fn drain_outbox(&self) {
        // SAFETY: main-thread access per the VST3 threading contract.
        let Some(host) = unsafe { &*self.host.get() }.clone() else {
            return;
        };
        // SAFETY: as above.
        let peer = unsafe { &*self.view_peer.get() }
            .clone()
            // SAFETY: as above.
            .or_else(|| unsafe { &*self.peer.get() }.clone());
        let Some(peer) = peer else { return };
        let endpoint = MessageEndpoint::new(host, peer);
        loop {
            // SAFETY: as above; the borrow ends before the send below.
            let msg = unsafe { &mut *self.bridge.get() }.pop_outbound();
            let Some(msg) = msg else { break };
            if let Err(err) = endpoint.send(&msg) {
                log::warn!("vst3: failed to send '{}': {err}", msg.id());
                break;
            }
        }
    }

    /// Restore serialized state and resync a connected editor.
    fn restore_state(&self, state: *mut IBStream) -> tresult {
        // SAFETY: state is a valid COM pointer or null.
        let Some(stream) = (unsafe { ComRef::from_raw(state) }) else {
            return kInvalidArgument;
        };

        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let mut bytes_read: i32 = 0;
            // SAFETY: chunk is writable for its length.
            let result = unsafe {
                stream.read(
                    chunk.as_mut_ptr() as *mut c_void,
                    chunk.len() as i32,
                    &mut bytes_read,
                )
            };
            if result != kResultOk || bytes_read <= 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..bytes_read as usize]);
        }

        if buffer.is_empty() {
            return kResultOk;
        }

        let Some((program, values)) = decode_state(&buffer) else {
            log::warn!("vst3: rejecting state blob ({} bytes)", buffer.len());
            return kResultFalse;
        };

        {
            // SAFETY: setState runs on the main thread.
            let plugin = unsafe { self.plugin_mut() };
            if !plugin.programs().is_empty() {
                plugin.load_program(program);
            }
            for (index, value) in values.iter().enumerate() {
                plugin.set_parameter_value(index as u32, *value);
            }
            let count = plugin.parameters().len() as u32;
            // SAFETY: as above; distinct cell.
            let bridge = unsafe { &mut *self.bridge.get() };
            for index in 0..count {
                bridge.queue_parameter(index);
            }
        }
        self.drain_outbox();
        kResultOk
    }
}

impl<P: Plugin + Default> ComponentFactory for BridgeProcessor<P> {
    fn create(_config: &'static Config, _vst3_config: &'static Vst3Config) -> Self {
        Self::new()
    }
}

impl<P: Plugin> Class for BridgeProcessor<P> {
    type Interfaces = (IComponent, IAudioProcessor, IEditController, IConnectionPoint);
}

#[allow(non_snake_case)]
impl<P: Plugin> IPluginBaseTrait for BridgeProcessor<P> {
    unsafe fn initialize(&self, context: *mut FUnknown) -> tresult {
        // SAFETY: context is a valid COM pointer or null.
        let host = unsafe { ComRef::from_raw(context) }.and_then(|c| c.cast::<IHostApplication>());
        if host.is_none() {
            log::warn!("vst3: host context without IHostApplication");
        }
        // SAFETY: initialize runs on the main thread.
        unsafe { *self.host.get() = host };
        kResultOk
    }

    unsafe fn terminate(&self) -> tresult {
        // Break the processor <-> view reference cycle and drop the
        // transport. The endpoint flag guards a view the host leaked.
        // SAFETY: terminate runs on the main thread.
        if let Some(valid) = unsafe { &mut *self.endpoint_valid.get() }.take() {
            valid.set(false);
        }
        // SAFETY: as above.
        unsafe {
            *self.view_peer.get() = None;
            *self.peer.get() = None;
            *self.host.get() = None;
        }
        // SAFETY: the handler was AddRef'd in setComponentHandler or is null.
        unsafe { com_release(*self.handler.get()) };
        // SAFETY: as above.
        unsafe { *self.handler.get() = std::ptr::null_mut() };
        kResultOk
    }
}

#[allow(non_snake_case)]
impl<P: Plugin> IComponentTrait for BridgeProcessor<P> {
    unsafe fn getControllerClassId(&self, _class_id: *mut TUID) -> tresult {
        // Combined component: processor and controller are the same object.
        kNotImplemented
    }

    unsafe fn setIoMode(&self, _mode: IoMode) -> tresult {
        kResultOk
    }

    unsafe fn getBusCount(&self, media_type: MediaType, dir: BusDirection) -> i32 {
        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        match media_type as MediaTypes {
            MediaTypes_::kAudio => match dir as BusDirections {
                BusDirections_::kInput => plugin.input_buses().len() as i32,
                BusDirections_::kOutput => plugin.output_buses().len() as i32,
                _ => 0,
            },
            _ => 0,
        }
    }

    unsafe fn getBusInfo(
        &self,
        media_type: MediaType,
        dir: BusDirection,
        index: i32,
        bus: *mut BusInfo,
    ) -> tresult {
        if bus.is_null() || media_type as MediaTypes != MediaTypes_::kAudio {
            return kInvalidArgument;
        }

        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let info = match dir as BusDirections {
            BusDirections_::kInput => plugin.input_buses().get(index as usize),
            BusDirections_::kOutput => plugin.output_buses().get(index as usize),
            _ => None,
        };
        let Some(info) = info else {
            return kInvalidArgument;
        };

        // SAFETY: bus is non-null (checked above).
        let bus = unsafe { &mut *bus };
        bus.mediaType = MediaTypes_::kAudio as MediaType;
        bus.direction = dir;
        bus.channelCount = info.channel_count as i32;
        copy_wstring(info.name, &mut bus.name);
        bus.busType = BusTypes_::kMain as BusType;
        bus.flags = BusInfo_::BusFlags_::kDefaultActive;
        kResultOk
    }

    unsafe fn getRoutingInfo(
        &self,
        _in_info: *mut RoutingInfo,
        _out_info: *mut RoutingInfo,
    ) -> tresult {
        kNotImplemented
    }

    unsafe fn activateBus(
        &self,
        _media_type: MediaType,
        _dir: BusDirection,
        _index: i32,
        _state: TBool,
    ) -> tresult {
        kResultOk
    }

    unsafe fn setActive(&self, state: TBool) -> tresult {
        // SAFETY: setActive is serialized against process by the host.
        let plugin = unsafe { self.plugin_mut() };
        if state != 0 {
            plugin.activate();
        } else {
            plugin.deactivate();
        }
        kResultOk
    }

    unsafe fn setState(&self, state: *mut IBStream) -> tresult {
        self.restore_state(state)
    }

    unsafe fn getState(&self, state: *mut IBStream) -> tresult {
        // SAFETY: state is a valid COM pointer or null.
        let Some(stream) = (unsafe { ComRef::from_raw(state) }) else {
            return kInvalidArgument;
        };

        // SAFETY: getState runs on the main thread.
        let plugin = unsafe { self.plugin() };
        let values: Vec<f32> = (0..plugin.parameters().len() as u32)
            .map(|i| plugin.parameter_value(i))
            .collect();
        let data = encode_state(plugin.current_program(), &values);

        let mut bytes_written: i32 = 0;
        // SAFETY: data is readable for its length.
        let result = unsafe {
            stream.write(
                data.as_ptr() as *mut c_void,
                data.len() as i32,
                &mut bytes_written,
            )
        };
        if result == kResultOk && bytes_written == data.len() as i32 {
            kResultOk
        } else {
            kResultFalse
        }
    }
}

#[allow(non_snake_case)]
impl<P: Plugin> IAudioProcessorTrait for BridgeProcessor<P> {
    unsafe fn setBusArrangements(
        &self,
        inputs: *mut SpeakerArrangement,
        num_ins: i32,
        outputs: *mut SpeakerArrangement,
        num_outs: i32,
    ) -> tresult {
        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let input_buses = plugin.input_buses();
        let output_buses = plugin.output_buses();

        if num_ins as usize != input_buses.len() || num_outs as usize != output_buses.len() {
            return kResultFalse;
        }

        for (i, info) in input_buses.iter().enumerate() {
            // SAFETY: the host provides num_ins readable arrangements.
            let requested = unsafe { *inputs.add(i) };
            if requested != channel_count_to_speaker_arrangement(info.channel_count) {
                return kResultFalse;
            }
        }
        for (i, info) in output_buses.iter().enumerate() {
            // SAFETY: the host provides num_outs readable arrangements.
            let requested = unsafe { *outputs.add(i) };
            if requested != channel_count_to_speaker_arrangement(info.channel_count) {
                return kResultFalse;
            }
        }

        kResultTrue
    }

    unsafe fn getBusArrangement(
        &self,
        dir: BusDirection,
        index: i32,
        arr: *mut SpeakerArrangement,
    ) -> tresult {
        if arr.is_null() {
            return kInvalidArgument;
        }

        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let info = match dir as BusDirections {
            BusDirections_::kInput => plugin.input_buses().get(index as usize),
            BusDirections_::kOutput => plugin.output_buses().get(index as usize),
            _ => None,
        };
        let Some(info) = info else {
            return kInvalidArgument;
        };
        // SAFETY: arr is non-null (checked above).
        unsafe { *arr = channel_count_to_speaker_arrangement(info.channel_count) };
        kResultOk
    }

    unsafe fn canProcessSampleSize(&self, symbolic_sample_size: i32) -> tresult {
        match symbolic_sample_size as SymbolicSampleSizes {
            SymbolicSampleSizes_::kSample32 => kResultOk,
            _ => kNotImplemented,
        }
    }

    unsafe fn getLatencySamples(&self) -> u32 {
        0
    }

    unsafe fn setupProcessing(&self, setup: *mut ProcessSetup) -> tresult {
        if setup.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: setup is non-null (checked above).
        let setup = unsafe { &*setup };

        // SAFETY: setupProcessing is serialized against process by the host.
        unsafe { self.plugin_mut() }.set_sample_rate(setup.sampleRate);
        // SAFETY: as above; distinct cell.
        unsafe { &mut *self.bridge.get() }.queue_sample_rate(setup.sampleRate);
        self.drain_outbox();
        kResultOk
    }

    unsafe fn setProcessing(&self, _state: TBool) -> tresult {
        kResultOk
    }

    unsafe fn process(&self, data: *mut ProcessData) -> tresult {
        if data.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: data is non-null (checked above).
        let process_data = unsafe { &*data };
        let num_samples = process_data.numSamples as usize;

        // Host automation, applied before rendering. Only the last point of
        // each queue is used.
        // SAFETY: the changes pointer is valid for this call or null.
        if let Some(param_changes) = unsafe { ComRef::from_raw(process_data.inputParameterChanges) }
        {
            // SAFETY: process has exclusive access per the VST3 threading
            // contract.
            let plugin = unsafe { self.plugin_mut() };
            let parameters = plugin.parameters();
            let offset = plugin.parameter_offset();
            let program_count = plugin.programs().len() as u32;
            // SAFETY: as above; distinct cell.
            let bridge = unsafe { &mut *self.bridge.get() };

            // SAFETY: the queue list is valid for this call.
            let param_count = unsafe { param_changes.getParameterCount() };
            for i in 0..param_count {
                // SAFETY: i is within the queue count.
                let Some(queue) = (unsafe { ComRef::from_raw(param_changes.getParameterData(i)) })
                else {
                    continue;
                };
                // SAFETY: queue is valid for this call.
                let point_count = unsafe { queue.getPointCount() };
                if point_count <= 0 {
                    continue;
                }
                let mut sample_offset = 0;
                let mut value = 0.0;
                // SAFETY: point_count - 1 is a valid point index.
                if unsafe { queue.getPoint(point_count - 1, &mut sample_offset, &mut value) }
                    != kResultTrue
                {
                    continue;
                }
                // SAFETY: queue is valid for this call.
                let param_id = unsafe { queue.getParameterId() };

                if program_count > 0 && param_id == 0 {
                    let index = (value * f64::from(program_count - 1) + 0.5) as u32;
                    plugin.load_program(index.min(program_count - 1));
                    for index in 0..parameters.len() as u32 {
                        bridge.queue_parameter(index);
                    }
                } else if let Some(index) = param_id.checked_sub(offset) {
                    if let Some(info) = parameters.get(index as usize) {
                        plugin.set_parameter_value(index, info.denormalize(value));
                        bridge.queue_parameter(index);
                    }
                }
            }
        }

        if num_samples == 0 {
            return kResultOk;
        }

        // Channel slices live on the stack; the audio path never allocates.
        let mut input_slices: [&[f32]; MAX_PROCESS_CHANNELS] = [&[]; MAX_PROCESS_CHANNELS];
        let mut input_count = 0;
        if process_data.numInputs > 0 && !process_data.inputs.is_null() {
            // SAFETY: the host provides numInputs readable bus structs.
            let input_buses =
                unsafe { slice::from_raw_parts(process_data.inputs, process_data.numInputs as usize) };
            for bus in input_buses {
                let num_channels = (bus.numChannels as usize).min(MAX_CHANNELS_PER_BUS);
                // SAFETY: 32-bit processing was negotiated via
                // canProcessSampleSize, so the union holds channelBuffers32.
                let buffers = unsafe { bus.__field0.channelBuffers32 };
                if num_channels == 0 || buffers.is_null() {
                    continue;
                }
                // SAFETY: the host provides num_channels channel pointers.
                let channel_ptrs = unsafe { slice::from_raw_parts(buffers, num_channels) };
                for &ptr in channel_ptrs {
                    if input_count == MAX_PROCESS_CHANNELS {
                        break;
                    }
                    if !ptr.is_null() {
                        // SAFETY: each channel holds num_samples samples.
                        input_slices[input_count] = unsafe { slice::from_raw_parts(ptr, num_samples) };
                        input_count += 1;
                    }
                }
            }
        }

        let mut output_slices: [&mut [f32]; MAX_PROCESS_CHANNELS] =
            std::array::from_fn(|_| &mut [] as &mut [f32]);
        let mut output_count = 0;
        if process_data.numOutputs > 0 && !process_data.outputs.is_null() {
            // SAFETY: the host provides numOutputs readable bus structs.
            let output_buses = unsafe {
                slice::from_raw_parts(process_data.outputs, process_data.numOutputs as usize)
            };
            for bus in output_buses {
                let num_channels = (bus.numChannels as usize).min(MAX_CHANNELS_PER_BUS);
                // SAFETY: see the input collection above.
                let buffers = unsafe { bus.__field0.channelBuffers32 };
                if num_channels == 0 || buffers.is_null() {
                    continue;
                }
                // SAFETY: the host provides num_channels channel pointers.
                let channel_ptrs = unsafe { slice::from_raw_parts(buffers, num_channels) };
                for &ptr in channel_ptrs {
                    if output_count == MAX_PROCESS_CHANNELS {
                        break;
                    }
                    if !ptr.is_null() {
                        // SAFETY: each channel holds num_samples writable
                        // samples, and output channels never alias.
                        output_slices[output_count] =
                            unsafe { slice::from_raw_parts_mut(ptr, num_samples) };
                        output_count += 1;
                    }
                }
            }
        }

        // SAFETY: process has exclusive access per the VST3 threading contract.
        unsafe { self.plugin_mut() }.process(
            &input_slices[..input_count],
            &mut output_slices[..output_count],
        );
        kResultOk
    }

    unsafe fn getTailSamples(&self) -> u32 {
        0
    }
}

#[allow(non_snake_case)]
impl<P: Plugin> IEditControllerTrait for BridgeProcessor<P> {
    unsafe fn setComponentState(&self, state: *mut IBStream) -> tresult {
        // Combined component: the host may hand the state to either side.
        self.restore_state(state)
    }

    unsafe fn setState(&self, _state: *mut IBStream) -> tresult {
        kResultOk
    }

    unsafe fn getState(&self, _state: *mut IBStream) -> tresult {
        kResultOk
    }

    unsafe fn getParameterCount(&self) -> i32 {
        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        (plugin.parameter_offset() + plugin.parameters().len() as u32) as i32
    }

    unsafe fn getParameterInfo(&self, param_index: i32, info: *mut ParameterInfo) -> tresult {
        if info.is_null() || param_index < 0 {
            return kInvalidArgument;
        }
        let param_index = param_index as u32;
        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let offset = plugin.parameter_offset();

        // SAFETY: info is non-null (checked above).
        let info = unsafe { &mut *info };
        info.unitId = 0;

        if offset > 0 && param_index == 0 {
            info.id = 0;
            copy_wstring("Program", &mut info.title);
            copy_wstring("Program", &mut info.shortTitle);
            copy_wstring("", &mut info.units);
            info.stepCount = plugin.programs().len() as i32 - 1;
            info.defaultNormalizedValue = 0.0;
            info.flags = ParameterInfo_::ParameterFlags_::kCanAutomate
                | ParameterInfo_::ParameterFlags_::kIsList
                | ParameterInfo_::ParameterFlags_::kIsProgramChange;
            return kResultOk;
        }

        let Some(param) = plugin.parameters().get((param_index - offset) as usize) else {
            return kInvalidArgument;
        };
        info.id = param_index;
        copy_wstring(param.name, &mut info.title);
        copy_wstring(param.symbol, &mut info.shortTitle);
        copy_wstring(param.unit, &mut info.units);
        info.stepCount = 0;
        info.defaultNormalizedValue = param.normalize(param.default);
        info.flags = ParameterInfo_::ParameterFlags_::kCanAutomate;
        kResultOk
    }

    unsafe fn getParamStringByValue(
        &self,
        id: u32,
        value_normalized: f64,
        string: *mut String128,
    ) -> tresult {
        if string.is_null() {
            return kInvalidArgument;
        }

        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let offset = plugin.parameter_offset();

        let display = if offset > 0 && id == 0 {
            let programs = plugin.programs();
            let index = (value_normalized * f64::from(self.program_count() - 1) + 0.5) as usize;
            programs.get(index).copied().unwrap_or("").to_owned()
        } else {
            match id
                .checked_sub(offset)
                .and_then(|i| plugin.parameters().get(i as usize))
            {
                Some(param) => format!("{:.2}", param.denormalize(value_normalized)),
                None => return kInvalidArgument,
            }
        };

        // SAFETY: string is non-null (checked above).
        copy_wstring(&display, unsafe { &mut *string });
        kResultOk
    }

    unsafe fn getParamValueByString(
        &self,
        id: u32,
        string: *mut TChar,
        value_normalized: *mut f64,
    ) -> tresult {
        if string.is_null() || value_normalized.is_null() {
            return kInvalidArgument;
        }

        // SAFETY: string is a null-terminated wide string.
        let len = unsafe { len_wstring(string) };
        // SAFETY: len code units are readable.
        let units = unsafe { slice::from_raw_parts(string as *const u16, len) };
        let Ok(text) = String::from_utf16(units) else {
            return kInvalidArgument;
        };

        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let offset = plugin.parameter_offset();

        if offset > 0 && id == 0 {
            let programs = plugin.programs();
            let Some(index) = programs.iter().position(|name| *name == text.trim()) else {
                return kInvalidArgument;
            };
            let steps = (programs.len() - 1).max(1) as f64;
            // SAFETY: value_normalized is non-null (checked above).
            unsafe { *value_normalized = index as f64 / steps };
            return kResultOk;
        }

        let Some(param) = id
            .checked_sub(offset)
            .and_then(|i| plugin.parameters().get(i as usize))
        else {
            return kInvalidArgument;
        };
        let Ok(plain) = text.trim().parse::<f32>() else {
            return kInvalidArgument;
        };
        // SAFETY: value_normalized is non-null (checked above).
        unsafe { *value_normalized = param.normalize(plain) };
        kResultOk
    }

    unsafe fn normalizedParamToPlain(&self, id: u32, value_normalized: f64) -> f64 {
        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let offset = plugin.parameter_offset();
        if offset > 0 && id == 0 {
            return value_normalized * f64::from(self.program_count() - 1);
        }
        match id
            .checked_sub(offset)
            .and_then(|i| plugin.parameters().get(i as usize))
        {
            Some(param) => f64::from(param.denormalize(value_normalized)),
            None => 0.0,
        }
    }

    unsafe fn plainParamToNormalized(&self, id: u32, plain_value: f64) -> f64 {
        // SAFETY: shared read of static plugin metadata.
        let plugin = unsafe { self.plugin() };
        let offset = plugin.parameter_offset();
        if offset > 0 && id == 0 {
            let steps = f64::from(self.program_count() - 1).max(1.0);
            return (plain_value / steps).clamp(0.0, 1.0);
        }
        match id
            .checked_sub(offset)
            .and_then(|i| plugin.parameters().get(i as usize))
        {
            Some(param) => param.normalize(plain_value as f32),
            None => 0.0,
        }
    }

    unsafe fn getParamNormalized(&self, id: u32) -> f64 {
        // SAFETY: getParamNormalized runs on the main thread.
        let plugin = unsafe { self.plugin() };
        let offset = plugin.parameter_offset();
        if offset > 0 && id == 0 {
            let steps = f64::from(self.program_count() - 1).max(1.0);
            return f64::from(plugin.current_program()) / steps;
        }
        match id
            .checked_sub(offset)
            .and_then(|i| plugin.parameters().get(i as usize).map(|p| (i, p)))
        {
            Some((index, param)) => param.normalize(plugin.parameter_value(index)),
            None => 0.0,
        }
    }

    unsafe fn setParamNormalized(&self, id: u32, value: f64) -> tresult {
        let applied = {
            // SAFETY: setParamNormalized runs on the main thread; the borrow
            // ends before drain_outbox below.
            let plugin = unsafe { self.plugin_mut() };
            let offset = plugin.parameter_offset();
            let program_count = plugin.programs().len() as u32;
            // SAFETY: as above; distinct cell.
            let bridge = unsafe { &mut *self.bridge.get() };

            if program_count > 0 && id == 0 {
                let index = (value * f64::from(program_count - 1) + 0.5) as u32;
                plugin.load_program(index.min(program_count - 1));
                for index in 0..plugin.parameters().len() as u32 {
                    bridge.queue_parameter(index);
                }
                true
            } else {
                match id
                    .checked_sub(offset)
                    .and_then(|i| plugin.parameters().get(i as usize).map(|p| (i, *p)))
                {
                    Some((index, param)) => {
                        plugin.set_parameter_value(index, param.denormalize(value));
                        bridge.queue_parameter(index);
                        true
                    }
                    None => false,
                }
            }
        };

        if applied {
            kResultOk
        } else {
            kInvalidArgument
        }
    }

    unsafe fn setComponentHandler(&self, handler: *mut IComponentHandler) -> tresult {
        let slot = self.handler.get();
        // SAFETY: setComponentHandler runs on the main thread.
        let old = unsafe { *slot };
        // SAFETY: old is a valid COM pointer or null.
        unsafe { com_release(old) };
        // SAFETY: handler is a valid COM pointer provided by the host, or null.
        unsafe { com_addref(handler) };
        // SAFETY: main-thread access.
        unsafe { *slot = handler };
        kResultOk
    }

    unsafe fn createView(&self, name: FIDString) -> *mut IPlugView {
        if name.is_null() {
            return std::ptr::null_mut();
        }
        // SAFETY: the host provides a null-terminated C string.
        if unsafe { CStr::from_ptr(name) }.to_str() != Ok("editor") {
            return std::ptr::null_mut();
        }

        // SAFETY: createView runs on the main thread.
        let Some(host) = unsafe { &*self.host.get() }.clone() else {
            log::warn!("vst3: createView before initialize");
            return std::ptr::null_mut();
        };

        // SAFETY: as above.
        let plugin = unsafe { self.plugin() };
        let Some(editor) = plugin.create_editor() else {
            return std::ptr::null_mut();
        };

        let view = ComWrapper::new(BridgeView::new(
            host,
            editor,
            plugin.sample_rate(),
            plugin.parameter_offset(),
            plugin.programs().len() as u32,
        ));
        let Some(view_cp) = view.to_com_ptr::<IConnectionPoint>() else {
            return std::ptr::null_mut();
        };

        // Wire both directions: the view gets a forwarding endpoint into
        // this processor, and we keep the view's connection point to drain
        // editor-bound replies into. Any previous endpoint is invalidated.
        // SAFETY: as above.
        if let Some(valid) = unsafe { &mut *self.endpoint_valid.get() }.take() {
            valid.set(false);
        }
        let valid = Rc::new(Cell::new(true));
        let endpoint = ComWrapper::new(ProcessorEndpoint::<P> {
            processor: self as *const Self,
            valid: valid.clone(),
        });
        let Some(endpoint_cp) = endpoint.to_com_ptr::<IConnectionPoint>() else {
            return std::ptr::null_mut();
        };
        // SAFETY: endpoint_cp is a valid connection point; the view AddRefs
        // it and keeps it alive.
        unsafe { view_cp.connect(endpoint_cp.as_ptr()) };

        // SAFETY: main-thread access.
        unsafe {
            *self.view_peer.get() = Some(view_cp);
            *self.endpoint_valid.get() = Some(valid);
        }

        match view.to_com_ptr::<IPlugView>() {
            Some(ptr) => ptr.into_raw(),
            None => std::ptr::null_mut(),
        }
    }
}

#[allow(non_snake_case)]
impl<P: Plugin> IConnectionPointTrait for BridgeProcessor<P> {
    unsafe fn connect(&self, other: *mut IConnectionPoint) -> tresult {
        // SAFETY: connect runs on the main thread.
        let peer = unsafe { &mut *self.peer.get() };
        if peer.is_some() {
            log::warn!("vst3: processor endpoint connected twice");
            return kInvalidArgument;
        }
        // SAFETY: other is a valid COM pointer or null.
        let Some(other) = (unsafe { ComRef::from_raw(other) }) else {
            return kInvalidArgument;
        };
        *peer = Some(other.to_com_ptr());
        kResultOk
    }

    unsafe fn disconnect(&self, other: *mut IConnectionPoint) -> tresult {
        if other.is_null() {
            return kInvalidArgument;
        }
        // SAFETY: disconnect runs on the main thread.
        if unsafe { &mut *self.peer.get() }.take().is_none() {
            log::warn!("vst3: processor endpoint disconnected while not connected");
            return kInvalidArgument;
        }
        kResultOk
    }

    unsafe fn notify(&self, message: *mut IMessage) -> tresult {
        self.on_peer_message(message)
    }
}

// Safety net in case terminate() was not called by the host.
impl<P: Plugin> Drop for BridgeProcessor<P> {
    fn drop(&mut self) {
        if let Some(valid) = self.endpoint_valid.get_mut().take() {
            valid.set(false);
        }
        let handler = *self.handler.get_mut();
        // SAFETY: handler was AddRef'd in setComponentHandler or is null.
        unsafe { com_release(handler) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::alloc::{GlobalAlloc, Layout, System};

    std::thread_local! {
        static TRACKING: Cell<bool> = const { Cell::new(false) };
        static ALLOC_COUNT: Cell<usize> = const { Cell::new(0) };
        static LARGEST_REQUEST: Cell<usize> = const { Cell::new(0) };
    }

    /// Counts this thread's heap allocations while tracking is enabled.
    struct TrackingAllocator;

    // SAFETY: delegates to the system allocator; the bookkeeping is
    // thread-local, allocation-free and guarded against TLS teardown.
    unsafe impl GlobalAlloc for TrackingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let _ = TRACKING.try_with(|tracking| {
                if tracking.get() {
                    ALLOC_COUNT.with(|count| count.set(count.get() + 1));
                    LARGEST_REQUEST.with(|largest| largest.set(largest.get().max(layout.size())));
                }
            });
            // SAFETY: same contract as the caller's.
            unsafe { System.alloc(layout) }
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            // SAFETY: same contract as the caller's.
            unsafe { System.dealloc(ptr, layout) }
        }
    }

    #[global_allocator]
    static ALLOCATOR: TrackingAllocator = TrackingAllocator;

    /// Run `f` and report (allocation count, largest request in bytes).
    fn measure_allocations<R>(f: impl FnOnce() -> R) -> (usize, usize, R) {
        ALLOC_COUNT.with(|count| count.set(0));
        LARGEST_REQUEST.with(|largest| largest.set(0));
        TRACKING.with(|tracking| tracking.set(true));
        let result = f();
        TRACKING.with(|tracking| tracking.set(false));
        (
            ALLOC_COUNT.with(|count| count.get()),
            LARGEST_REQUEST.with(|largest| largest.get()),
            result,
        )
    }

    #[derive(Default)]
    struct SilentPlugin {
        sample_rate: f64,
    }

    impl Plugin for SilentPlugin {
        fn parameters(&self) -> &'static [CoreParameterInfo] {
            &[]
        }

        fn parameter_value(&self, _index: u32) -> f32 {
            0.0
        }

        fn set_parameter_value(&mut self, _index: u32, _value: f32) {}

        fn input_buses(&self) -> &'static [trestle_core::BusInfo] {
            &[]
        }

        fn output_buses(&self) -> &'static [trestle_core::BusInfo] {
            &[]
        }

        fn set_sample_rate(&mut self, sample_rate: f64) {
            self.sample_rate = sample_rate;
        }

        fn sample_rate(&self) -> f64 {
            self.sample_rate
        }

        fn process(&mut self, _inputs: &[&[f32]], _outputs: &mut [&mut [f32]]) {}
    }

    #[test]
    fn test_process_does_not_allocate() {
        let processor = BridgeProcessor::<SilentPlugin>::new();
        let mut data = ProcessData {
            processMode: ProcessModes_::kRealtime as i32,
            symbolicSampleSize: SymbolicSampleSizes_::kSample32 as i32,
            numSamples: 64,
            numInputs: 0,
            numOutputs: 0,
            inputs: std::ptr::null_mut(),
            outputs: std::ptr::null_mut(),
            inputParameterChanges: std::ptr::null_mut(),
            outputParameterChanges: std::ptr::null_mut(),
            inputEvents: std::ptr::null_mut(),
            outputEvents: std::ptr::null_mut(),
            processContext: std::ptr::null_mut(),
        };

        let (allocations, _, result) =
            // SAFETY: data is a valid ProcessData for this call.
            measure_allocations(|| unsafe { IAudioProcessorTrait::process(&processor, &mut data) });
        assert_eq!(result, kResultOk);
        assert_eq!(allocations, 0);
    }

    #[test]
    fn test_state_round_trip() {
        let values = [0.0f32, -6.5, 440.0, 1000.0];
        let blob = encode_state(2, &values);
        let (program, decoded) = decode_state(&blob).unwrap();
        assert_eq!(program, 2);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_state_rejects_wrong_version() {
        let mut blob = encode_state(0, &[1.0]);
        blob[0] = 0xff;
        assert!(decode_state(&blob).is_none());
    }

    #[test]
    fn test_state_rejects_truncated_blob() {
        let blob = encode_state(0, &[1.0, 2.0]);
        assert!(decode_state(&blob[..blob.len() - 2]).is_none());
        assert!(decode_state(&[]).is_none());
    }

    #[test]
    fn test_state_rejects_oversized_count_without_reserving() {
        // 12 bytes claiming 2^28 values must not drive a huge reservation.
        let mut blob = Vec::new();
        blob.extend_from_slice(&STATE_VERSION.to_le_bytes());
        blob.extend_from_slice(&0u32.to_le_bytes());
        blob.extend_from_slice(&(1u32 << 28).to_le_bytes());

        let (_, largest_request, decoded) = measure_allocations(|| decode_state(&blob));
        assert!(decoded.is_none());
        assert!(largest_request < 4096);
    }

    #[test]
    fn test_speaker_arrangements() {
        assert_eq!(channel_count_to_speaker_arrangement(1), SpeakerArr::kMono);
        assert_eq!(channel_count_to_speaker_arrangement(2), SpeakerArr::kStereo);
        assert_eq!(channel_count_to_speaker_arrangement(4), 0b1111);
    }
}
