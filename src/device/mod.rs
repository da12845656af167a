//! The device stack collaborator.
//!
//! The pipeline drives any camera stack through the [`Device`] trait: it configures streams,
//! allocates buffers, and moves [`Request`]s in and out. Completions come back through an
//! explicitly registered [`CompletionHandler`], which the pipeline installs on start and removes
//! on stop.

pub mod virtual_device;
pub use virtual_device::VirtualDevice;

use crate::buffer::FrameBuffer;
use crate::control::{ControlList, Rectangle};
use crate::error::Result;
use crate::request::Request;
use crate::stream::{StreamConfig, StreamId};

/// Callback receiving completed (or cancelled) requests
///
/// Runs on whatever thread the device completes requests on.
pub type CompletionHandler = Box<dyn Fn(Request) + Send + Sync>;

/// Result of negotiating a stream configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigStatus {
    Valid,
    /// The device changed some parameters to values it supports
    Adjusted,
    Invalid,
}

/// Static sensor properties
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Properties {
    /// Largest crop rectangle the scaler accepts
    pub scaler_crop_maximum: Rectangle,
    /// Active pixel areas of the sensor
    pub pixel_array_active_areas: Vec<Rectangle>,
}

/// A camera device stack
pub trait Device: Send + Sync {
    /// Negotiates `streams`, filling in anything left at zero
    fn configure(&self, streams: &mut [StreamConfig]) -> Result<ConfigStatus>;

    /// Allocates the buffers of a configured stream
    ///
    /// Buffers stay owned by the device until [`Device::release`].
    fn allocate(&self, stream: StreamId) -> Result<Vec<FrameBuffer>>;

    /// Frees every buffer handed out by [`Device::allocate`]
    fn release(&self);

    /// Starts streaming with an initial set of controls
    fn start(&self, controls: &ControlList) -> Result<()>;

    /// Stops streaming
    ///
    /// Every request still queued is handed back to the completion handler with
    /// `RequestStatus::Cancelled` before this returns.
    fn stop(&self) -> Result<()>;

    /// Queues an armed request for capture
    fn queue_request(&self, request: Request) -> Result<()>;

    /// Installs (or with `None`, removes) the completion handler
    fn set_completion_handler(&self, handler: Option<CompletionHandler>);

    /// Sensor capabilities such as the crop and active pixel areas
    fn properties(&self) -> Properties;
}
