pub mod bootstrap;
pub mod bots;
pub mod catalog;
pub mod config;
pub mod handler;
pub mod service;
