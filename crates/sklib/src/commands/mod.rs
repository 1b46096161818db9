//! Command implementations

pub mod doctor;

pub mod publish;
