pub mod common;

mod archive_tests;
