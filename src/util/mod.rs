//! Various utilities

pub mod deferred_delete;

#[cfg(test)]
pub(crate) mod testing;
