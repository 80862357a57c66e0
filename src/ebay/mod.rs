#![allow(unused_imports)]

pub mod auth;
pub mod browse;
pub mod config;

pub use auth::get_app_access_token;
pub use browse::{Availability, BrowseClient, BrowseError, Marketplace, RawItem, SearchPage};
