pub mod bill;
pub mod chat;
pub mod knowledge;
pub mod settings;
