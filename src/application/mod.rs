pub mod access;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod repos;
pub mod tasks;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;
