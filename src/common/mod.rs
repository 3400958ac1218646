pub mod requests;
pub mod types;

pub use requests::{
    ConversationRequest, ConversationsQuery, MessagesQuery, UnreadCountQuery, UnreadCountResult,
};
pub use types::{Chat, Message, MessageStatus};
