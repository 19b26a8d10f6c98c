pub mod agent_loader;
pub mod conference;
pub mod config;
pub mod console;
pub mod openai_adapter;
pub mod sink;
