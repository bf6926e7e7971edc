pub mod chunk_store;
pub mod cleanup;
pub mod docgen;
pub mod drive;
pub mod history_service;
pub mod jobs;
pub mod summarizer;
pub mod transcriber;
