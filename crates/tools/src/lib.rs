//! Command execution primitives for OpenAgent.
//!
//! - [`shell::ShellRunner`] spawns the model's commands through a real shell
//!   with a wall-clock timeout.
//! - [`text`] shapes command output (regex filtering, tailing) before it is
//!   embedded in an observation.

pub mod shell;
pub mod text;

pub use shell::ShellRunner;
pub use text::{apply_filter, tail_lines};
