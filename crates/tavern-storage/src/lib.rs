pub mod errors;
pub mod memory;
pub mod model;
pub mod rest;
pub mod spi;

pub mod prelude;
