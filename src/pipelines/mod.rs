pub mod amplicon;
pub mod pool;
pub mod sample;
