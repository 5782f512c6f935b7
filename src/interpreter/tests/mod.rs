//! Engine tests
//!
//! Organized by feature area

pub(crate) mod helpers;

mod function_tests;
mod loop_tests;
mod try_tests;
