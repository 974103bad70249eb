pub mod assembler;
pub mod cache;
pub mod fetcher;
pub mod normalizer;
pub mod resolver;
pub mod season;
