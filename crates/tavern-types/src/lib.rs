pub mod id;
pub mod time;

pub mod prelude;
