//! AWS EC2 adapter.

pub mod client;
pub mod dto;

pub use client::AwsCliProvider;
