pub mod notifier;
pub mod payments;
pub mod reservation;
pub mod status;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;
