// src/services/mod.rs

pub mod anti_cheat;
pub mod grader;
pub mod late_code;
pub mod lifecycle;
pub mod results;
