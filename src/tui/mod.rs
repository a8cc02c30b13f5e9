pub mod app;
pub mod event;
pub mod message;
pub mod ui;
