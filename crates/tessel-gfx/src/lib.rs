//! Thin Vulkan hardware-abstraction layer.
//!
//! This crate provides:
//! - Instance creation, physical device scoring and logical device setup
//! - Optional feature negotiation and extension entry point loading
//! - Command queue submission
//! - Swapchain-backed presentation with resize support
//! - Descriptor-set and pipeline layout compilation
//!
//! The core never records draw or dispatch work itself; it hands out the
//! device, queues, framebuffers and layouts that a renderer records into.

pub mod capabilities;
pub mod command_queue;
pub mod config;
pub mod context;
pub mod debug;
pub mod deferred;
pub mod error;
pub mod extensions;
pub mod features;
pub mod instance;
pub mod memory;
pub mod queue_family;
pub mod render_window;
pub mod root_signature;
pub mod selection;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod window;

pub use capabilities::{DeviceInfo, GpuVendor};
pub use command_queue::CommandQueue;
pub use config::GfxSettings;
pub use context::DeviceContext;
pub use debug::{classify, Classified, DebugCategory, DebugSeverity};
pub use error::{GpuError, Result};
pub use extensions::OptionalExtensions;
pub use features::{NegotiatedFeatures, Probed};
pub use memory::{GpuAllocator, GpuBuffer, MemoryReport};
pub use queue_family::{QueueFamilyIndices, QueueRole};
pub use render_window::{AcquiredBackBuffer, RenderWindow};
pub use root_signature::{BindingDesc, ResourceKind, RootSignature, RootSignatureDesc};
pub use swapchain::{BackBuffers, FrameCounter};
pub use sync::{Fence, FenceRing};
pub use window::WindowProvider;

pub use gpu_allocator::MemoryLocation;
