pub mod catalog;
mod dispatch;

pub use dispatch::{DispatchOptions, DispatchOutput, Dispatcher};
