//! Frame capture pipeline.
//!
//! Buffers are allocated from a camera [`Device`] and mapped once. Requests carrying one buffer
//! per stream cycle through the device, come back as shared [`CompletedCapture`]s and are
//! resubmitted when the last consumer lets go of them. Consumers are the control thread (through
//! [`CameraApp::wait`]), the preview thread and an encoder.

mod sys;

pub mod device;
pub use device::{CompletionHandler, ConfigStatus, Device, Properties, VirtualDevice};

pub mod preview;
pub use preview::{NullPreview, Preview, PreviewStats};

pub mod capture;
pub use capture::{BufferMap, CompletedCapture, CompletedCapturePtr};

mod error;
pub use error::{Error, Result};

mod fourcc;
pub use fourcc::FourCC;

mod timestamp;
pub use timestamp::Timestamp;

mod memory;
pub use memory::MappedRegion;

mod buffer;
pub use buffer::{BufferId, BufferMetadata, FrameBuffer, FrameStatus, Plane};

mod control;
pub use control::{ControlId, ControlList, ControlValue, DenoiseMode, Rectangle, Size};

mod stream;
pub use stream::{Configuration, StillFlags, StreamConfig, StreamId, StreamInfo, StreamRole};
pub use stream::VideoFlags;

mod options;
pub use options::{Options, Roi};

mod request;
pub use request::{Request, RequestStatus};

mod buffer_pool;
pub use buffer_pool::{coalesce_planes, BufferPool};

mod request_pool;
pub use request_pool::RequestPool;

mod message;
pub use message::{Message, MessageQueue};

mod frame_info;
pub use frame_info::FrameInfo;

mod encoder;
pub use encoder::{CameraEncoder, EncodeInput, Encoder, EncoderQueue};
pub use encoder::{InputDoneCallback, OutputReadyCallback};

mod app;
pub use app::CameraApp;
