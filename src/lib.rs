pub mod app;
pub mod basecase;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod generator;
pub mod monitor;
pub mod normalizer;
pub mod output;
pub mod runner;
pub mod transport;
pub mod worker;

#[cfg(test)]
mod tests;
