//! Structured logging for entimap
//!
//! [`init`] installs a subscriber once per process. The lifecycle macros
//! (`log_op_start!`, `log_op_end!`, `log_op_error!`) are used only by public
//! repository and query operations; lower layers such as the meta store,
//! clause parsers and executors emit `tracing::debug!` and nothing louder.
//! [`init_test_capture`] records events in memory for assertions.
//!
//! ```rust
//! use entimap_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
