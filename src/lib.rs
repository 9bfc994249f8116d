#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod code;
pub mod hook;
pub mod mem;
pub mod resolve;

pub use code::PointerWidth;
pub use hook::Hook;
pub use resolve::FunctionAddress;
