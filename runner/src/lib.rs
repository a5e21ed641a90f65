pub mod build;
pub mod cancel;
pub mod command;
pub mod config;
pub mod executors;
pub mod experiment;
pub mod harness;
pub mod job;
pub mod logging;
pub mod output;
pub mod summary;

#[cfg(test)]
mod test_util;
