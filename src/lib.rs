// src/lib.rs

pub mod audit;
pub mod config;
pub mod db;
pub mod identity;
pub mod merge;
pub mod models;
pub mod normalize;
pub mod visual;
