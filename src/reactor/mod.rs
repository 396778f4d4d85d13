//! Readiness polling and the completion driver.

pub(crate) mod driver;
pub(crate) mod event;
