//! Integration tests for the crawl pipeline

mod pipeline_tests;
