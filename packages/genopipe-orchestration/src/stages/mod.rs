//! Concrete stage definitions for the shipped pipelines.

pub mod annotate;
pub mod rnaseq;
