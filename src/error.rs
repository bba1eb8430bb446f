//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Crate-wide error types.
//!
//! Every subsystem gets its own small error enum rather than one flat
//! `ErrorKind`, but they all nest into `GraphicsError` so a caller that
//! only wants "did this fail" can match on one type.
use std::error::Error as StdError;
use std::fmt;

/// An error surfaced by the GPU backend (the `Context` trait object) while
/// executing a queued command. Carries the backend's own error so callers
/// that care about the underlying cause can downcast it.
#[derive(Debug)]
pub struct GpuError(pub Box<dyn StdError + Send + Sync>);

impl GpuError {
    pub fn new<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        GpuError(Box::new(err))
    }

    pub fn msg(message: impl Into<String>) -> Self {
        GpuError(Box::new(Message(message.into())))
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPU error: {}", self.0)
    }
}

impl StdError for GpuError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}

impl Clone for GpuError {
    fn clone(&self) -> Self {
        GpuError::msg(self.0.to_string())
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}

/// Failures from the lock-free double-buffer staging queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DbqError {
    /// Growing the enqueue buffer to fit a record would exceed the 32 KiB
    /// cap. Treated as a programmer error: callers should not be staging
    /// single-frame bursts anywhere near this size.
    AllocOverflow { requested: usize, cap: usize },
}

impl fmt::Display for DbqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbqError::AllocOverflow { requested, cap } => write!(
                f,
                "double-buffer queue overflow: record of {} bytes would exceed the {} byte cap",
                requested, cap
            ),
        }
    }
}

impl StdError for DbqError {}

/// Failures from `Sync` state transitions and fence waits.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// `Sync::set` was called while the sync was not `clear`.
    AlreadySet,
    /// The sync thread's fence wait exceeded the configured timeout.
    FenceTimeout,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::AlreadySet => write!(f, "sync object is not clear"),
            SyncError::FenceTimeout => write!(f, "timed out waiting on a GPU fence"),
        }
    }
}

impl StdError for SyncError {}

/// Failures from `RenderPolicy`'s queue-graph operations.
#[derive(Debug, Clone)]
pub enum PolicyError {
    DuplicateQueue,
    SystemQueueProtected,
    NotFound,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::DuplicateQueue => write!(f, "queue is already present in this policy"),
            PolicyError::SystemQueueProtected => {
                write!(f, "the system and system-sync queues cannot be removed")
            }
            PolicyError::NotFound => write!(f, "no queue with that name is registered"),
        }
    }
}

impl StdError for PolicyError {}

/// Descriptor-validation failures raised while a resource's queued create
/// command runs on the render thread.
#[derive(Debug, Clone)]
pub enum ResourceError {
    InvalidTextureConfig(String),
    InvalidVertexAttributes(String),
    IncompleteFramebuffer(String),
    /// `create_finished_*` observed its resource still not `finished` after
    /// the creating command was drained — the create command itself
    /// reported (and logged) a `GpuError` rather than succeeding.
    CreationFailed,
    /// `Buffer::map` was called on a buffer created with `Mapping::Static`,
    /// which never acquires a CPU pointer.
    BufferNotMappable,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::InvalidTextureConfig(s) => write!(f, "invalid texture config: {}", s),
            ResourceError::InvalidVertexAttributes(s) => {
                write!(f, "invalid vertex attributes: {}", s)
            }
            ResourceError::IncompleteFramebuffer(s) => {
                write!(f, "incomplete framebuffer: {}", s)
            }
            ResourceError::CreationFailed => {
                write!(f, "resource creation command did not complete successfully")
            }
            ResourceError::BufferNotMappable => {
                write!(f, "buffer is not CPU-mappable (mapping = Static)")
            }
        }
    }
}

impl StdError for ResourceError {}

/// The crate's top-level error type. Every producer-facing entry point that
/// can fail returns `Result<_, GraphicsError>`.
#[derive(Debug, Clone)]
pub enum GraphicsError {
    /// A call was made from a thread not permitted to make it (e.g.
    /// `flush_commands` from the render thread, or `CommandQueue::execute`
    /// from a non-render thread).
    WrongThread,
    Gpu(GpuError),
    Sync(SyncError),
    Policy(PolicyError),
    Resource(ResourceError),
    Dbq(DbqError),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::WrongThread => write!(f, "called from the wrong thread"),
            GraphicsError::Gpu(e) => write!(f, "{}", e),
            GraphicsError::Sync(e) => write!(f, "{}", e),
            GraphicsError::Policy(e) => write!(f, "{}", e),
            GraphicsError::Resource(e) => write!(f, "{}", e),
            GraphicsError::Dbq(e) => write!(f, "{}", e),
        }
    }
}

impl StdError for GraphicsError {}

impl From<GpuError> for GraphicsError {
    fn from(e: GpuError) -> Self {
        GraphicsError::Gpu(e)
    }
}

impl From<SyncError> for GraphicsError {
    fn from(e: SyncError) -> Self {
        GraphicsError::Sync(e)
    }
}

impl From<PolicyError> for GraphicsError {
    fn from(e: PolicyError) -> Self {
        GraphicsError::Policy(e)
    }
}

impl From<ResourceError> for GraphicsError {
    fn from(e: ResourceError) -> Self {
        GraphicsError::Resource(e)
    }
}

impl From<DbqError> for GraphicsError {
    fn from(e: DbqError) -> Self {
        GraphicsError::Dbq(e)
    }
}

pub type Result<T> = ::std::result::Result<T, GraphicsError>;
