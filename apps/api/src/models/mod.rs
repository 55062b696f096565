pub mod interview;
pub mod prediction;
pub mod prep;
