pub mod chat;
pub mod errors;
pub mod imagegen;
pub mod provider;

pub mod prelude;
