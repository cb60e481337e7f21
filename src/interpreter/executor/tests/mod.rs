//! Tests for the execution core
//!
//! Organized by feature area

mod calltable_tests;
mod case_tests;
mod error_tests;
mod helpers;
mod statement_tests;
