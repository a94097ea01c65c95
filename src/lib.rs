pub mod config;
pub mod crawler;
pub mod failsafe;
pub mod flipper_store;
pub mod messages;
pub mod mode;
pub mod motor;
pub mod orientation;
pub mod practice;
pub mod runtime;
