pub mod bus;
pub mod factors;
pub mod handlers;
pub mod model;
pub mod pg;
pub mod recommendations;
pub mod retry;
pub mod store;

#[cfg(test)]
pub mod testing;
