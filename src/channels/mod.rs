pub mod chunker;
pub mod whatsapp;

pub use whatsapp::{InboundMessage, WhatsAppChannel};
