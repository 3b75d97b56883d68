pub mod codes;
pub mod model;

pub mod prelude;
