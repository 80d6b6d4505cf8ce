//! Tree Signal core
//!
//! Messages addressed to dotted channels (`this.that.other`) keep a tree of
//! panels alive. Each panel holds full weight while it receives messages,
//! fades out once they stop, and is pruned when it has fully faded. Every
//! change produces a fresh set of rectangles tiling the unit canvas.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tree_signal_core::prelude::*;
//!
//! let clock = Arc::new(SystemClock);
//! let service = Arc::new(TreeSignal::new(&TreeSignalConfig::load(None)?, clock)?);
//! let decay = service.start_decay_task();
//!
//! service.submit("this.that.other", "disk almost full", MessageSeverity::Warn)?;
//! for frame in &service.current_layout().frames {
//!     println!("{} {:?}", frame.path, frame.rect);
//! }
//!
//! decay.stop().await;
//! ```

// Core modules
pub mod clock;
pub mod config;
pub mod error;
pub mod history;
pub mod layout;
pub mod path;
pub mod scheduler;
pub mod service;
pub mod state_machine;
pub mod tree;
pub mod types;

// Deterministic stress harness
pub mod simulator;

// Re-exports
pub use error::*;
pub use types::*;

pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{DecayConfig, TreeSignalConfig};
    pub use crate::error::{DecayError, PathError, TreeError};
    pub use crate::history::{InMemoryHistory, MessageStore};
    pub use crate::layout::{LayoutGenerator, SplitAxis};
    pub use crate::path::ChannelPath;
    pub use crate::scheduler::{DecayScheduler, DecayTaskHandle, TickReport};
    pub use crate::service::{DeleteReport, LayoutUpdate, SubmitReceipt, TreeSignal, UpdateReason};
    pub use crate::tree::{ChannelTree, NodeView, TreeSnapshot};
    pub use crate::types::{
        LayoutFrame, LayoutRect, Message, MessageId, MessageSeverity, PanelState, Timestamp,
    };
    pub use std::sync::Arc;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
