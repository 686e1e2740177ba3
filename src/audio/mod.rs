pub mod analysis;
pub mod bands;
pub mod frames;
