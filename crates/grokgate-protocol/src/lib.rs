pub mod chat;
pub mod frame;
pub mod lines;
