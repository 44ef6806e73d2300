pub mod conversation;
pub mod escalation;
pub mod faq;
pub mod message;
pub mod user;
