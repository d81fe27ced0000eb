pub mod check;
pub mod online;
pub mod sample;
