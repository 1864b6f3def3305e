//! Embedded role prompts
//!
//! Compiled into the binary from .pmt files at build time.

pub const RESEARCH: &str = include_str!("../../prompts/research.pmt");
pub const WRITER: &str = include_str!("../../prompts/writer.pmt");
pub const VERIFICATION: &str = include_str!("../../prompts/verification.pmt");
pub const REFINEMENT: &str = include_str!("../../prompts/refinement.pmt");
pub const REVIEWER: &str = include_str!("../../prompts/reviewer.pmt");
pub const SCORE_VERIFIER: &str = include_str!("../../prompts/score_verifier.pmt");
pub const SUMMARY: &str = include_str!("../../prompts/summary.pmt");

/// Single-call prompt asking for every section at once
pub const SECTIONED: &str = include_str!("../../prompts/sectioned.pmt");
