pub mod api;
pub mod auth;
pub mod config;
pub mod donations;
pub mod error;
pub mod gallery;
pub mod guestbook;
pub mod model;
pub mod notice;
pub mod storage;
pub mod store;
pub mod viewer;
