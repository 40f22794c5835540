//! Integration tests module
//!
//! This module provides end-to-end integration tests for the ingestion
//! pipeline, including:
//! - Complete plan → discover → fetch → load runs
//! - Catalogs larger than the result ceiling
//! - Error handling and recovery scenarios

pub mod error_scenarios;
pub mod fixtures;
pub mod pipeline_test;
pub mod planner_test;
