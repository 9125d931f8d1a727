// src/utils/mod.rs

pub mod clock;
pub mod code;
pub mod html;
pub mod jwt;
