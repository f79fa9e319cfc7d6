//! Converts trimmed video clips to animated GIF or WebP.
//!
//! GIFs are made by piping raw frames from `ffmpeg` into `gifski`; WebP goes
//! through `ffmpeg` alone. Batches run sequentially on a worker thread and can
//! be cancelled at any point, see [`session::Session`].

pub mod command;
pub mod config;
pub mod convert;
pub mod error;
pub mod estimate;
pub mod filter;
pub mod pipeline;
pub mod probe;
pub mod request;
pub mod resolution;
pub mod session;
pub mod task;
pub mod timecode;

pub use error::{Error, Result};
