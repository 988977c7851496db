pub mod config;
pub mod dpl;
pub mod error;
pub mod mediawiki;
pub mod merge;
pub mod orchestrator;
pub mod producer;
pub mod sort_key;
pub mod tables;
pub mod transclusion;
