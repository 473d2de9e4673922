mod card;
mod config;
mod core;
mod dispatch;
mod document;
mod error;
mod history;
pub mod html;
mod ops;
mod plugin;
mod selection;
mod serialize;
mod toolbar;

pub use crate::card::*;
pub use crate::config::*;
pub use crate::core::*;
pub use crate::dispatch::*;
pub use crate::document::*;
pub use crate::error::*;
pub use crate::history::*;
pub use crate::plugin::*;
pub use crate::selection::*;
pub use crate::serialize::*;
pub use crate::toolbar::*;
