pub mod chat;
pub mod meeting;

pub use chat::*;
pub use meeting::*;
