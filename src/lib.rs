pub mod catalog;
pub mod config;
pub mod database;
pub mod object;
pub mod storage;
