pub mod access;
pub mod auth;
pub mod estimator;
pub mod expiry;
pub mod imaging;
pub mod pipeline;
pub mod queue;
pub mod reaper;
pub mod storage;
pub mod submission;
pub mod validation;
