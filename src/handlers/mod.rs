// src/handlers/mod.rs

pub mod attempts;
pub mod late_codes;
pub mod resume;
