//! epidiv: information-theoretic divergence scoring of chromatin-state
//! annotations across epigenomes.
//!
//! For each fixed-width genomic interval, an observed distribution of
//! per-epigenome state (or state-pair) tallies is scored against a
//! genome-wide background distribution, optionally contrasting two groups of
//! epigenomes. Three metric variants are available:
//!
//! - per-state KL divergence ([`kl_state`])
//! - KL over unordered state pairs ([`kl_pair`])
//! - KL over state pairs of individual epigenome pairs ([`kl_epipair`])
//!
//! Input is streamed one line per interval through the driver in
//! [`engine`]; the run either scores real intervals (observation + per-state
//! score records) or emits one scalar per line of pre-permuted input to
//! build a null distribution. The surrounding per-chromosome batch
//! submission, output compression, and collation are external concerns.

pub mod background;
pub mod engine;
pub mod input;
pub mod kl_epipair;
pub mod kl_pair;
pub mod kl_state;
pub mod output;
pub mod pairs;
pub mod run;
