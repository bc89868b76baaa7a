pub mod conversation_store;
pub mod db;
pub mod types;
