pub mod command;
pub mod consolidate;
pub mod fastx;
pub mod file;
pub mod pattern;
pub mod sequence;
pub mod streams;
pub mod system;
