mod common;
mod concurrency;
mod remove;
