//! Console automation for virtual machines.
//!
//! Scripts type text and keys into a VM and gate their control flow on what
//! OCR reads back from the screen.  See [`script`] for the language,
//! [`mode`] for the live and dry-run back ends.

pub mod cli;
pub mod config;
pub mod debugger;
pub mod keybind;
pub mod mode;
pub mod monitor;
pub mod ocr;
pub mod pattern;
pub mod screen;
pub mod script;
pub mod var;
