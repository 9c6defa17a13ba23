//! Playopia - login and registration service
//!
//! Username/password registration and login for a personal site. A
//! successful login opens a server-side session and sends the browser to
//! `/{username}`, a page only that account can view.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod views;
