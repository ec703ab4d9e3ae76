pub mod directory;
pub mod error;
pub mod recorder;
pub mod router;
pub mod telegram;
pub mod transport;

#[cfg(test)]
pub mod testing;
