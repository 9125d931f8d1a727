// src/models/mod.rs

pub mod attempt;
pub mod exam;
pub mod late_code;
pub mod response;
pub mod user;
