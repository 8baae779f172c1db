pub mod chat;
pub mod meeting;

pub use chat::ChatRepository;
pub use meeting::MeetingRepository;
