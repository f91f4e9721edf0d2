pub mod agent;
pub mod compose;
pub mod config;
pub mod decision;
pub mod imagegen;
pub mod json_extract;
pub mod layouts;
pub mod llm;
pub mod memory;
pub mod model;
pub mod render;
pub mod server;
pub mod store;
pub mod tools;
pub mod uploader;
pub mod util;
