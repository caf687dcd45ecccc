#![forbid(unsafe_code)]

pub mod chat_hub;
pub mod dashboard;
pub mod fanout;
pub mod highlight_hub;
pub mod history;
pub mod http;
pub mod relay;
pub mod settings_store;
pub mod source_manager;
pub mod ws;




#[cfg(test)]
mod highlight_hub_tests;


#[cfg(test)]
mod source_manager_tests;
