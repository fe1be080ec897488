//! Core engine logic
//!
//! - `clipboard`: capture pipeline and history
//! - `snippets`: user-authored snippets and folders
//! - `hotkeys`: key combinations and action dispatch
//! - `engine`: owns and wires everything above

pub mod clipboard;
pub mod engine;
pub mod hotkeys;
pub mod snippets;
