pub mod accessibility;
pub mod app;
pub mod axuielement;
pub mod enhanced_ui;
pub mod executor;
pub mod geometry;
pub mod screen;
pub mod timer;
pub mod transport;
pub mod window_notify;
