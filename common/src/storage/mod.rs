pub mod db;
pub mod indexes;
pub mod interfaces;
pub mod services;
pub mod surreal_impl;
pub mod types;
