mod conversation_service;
mod message_service;


pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, CreateConversationRequest,
    CreatedConversation,
};
pub use message_service::{
    MessageService, MessageServiceDependencies, ReactToMessageRequest, SendMessageRequest,
};
