pub mod blast;
pub mod coverage;
pub mod guards;
pub mod operations;
