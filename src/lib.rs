// Mini App session client - library root

pub mod auth;
pub mod auto_login;
pub mod config;
pub mod error;
pub mod http_client;
pub mod identity;
