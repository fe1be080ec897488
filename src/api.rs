//! Entry points for the UI layer
//!
//! Menus, paste execution and confirmation dialogs live outside this crate. They reach the
//! engine through the `gateway` module, addressing records by opaque key and `RecordKind`.

pub mod gateway;

pub use gateway::ActionGateway;
