pub mod ai_handlers;
pub mod drive_handlers;
pub mod health_handlers;
pub mod history_handlers;
pub mod transcribe_handlers;
pub mod upload_handlers;
