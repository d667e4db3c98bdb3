//! Timing smoke tests for the pool and pipe hot paths
