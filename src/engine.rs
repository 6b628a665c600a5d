//! The streaming metric engine.
//!
//! A [`DivergenceModel`] is one of three strategies sharing a capability
//! set: report the expected line width, accept one streamed integer field,
//! and finalize-and-emit when the line ends. The driver below owns the
//! line-by-line pass over the observation stream, so memory never scales
//! with the number of genomic intervals.

use anyhow::{bail, Context, Result};
use std::io::BufRead;

/// One metric strategy, fed one integer field at a time.
pub trait DivergenceModel {
    fn name(&self) -> &'static str;

    /// Number of observation columns expected per line, coordinate columns
    /// excluded.
    fn width(&self) -> usize;

    /// Whether this run emits bare scalar values for a null distribution
    /// (no coordinate columns on input, no per-state breakdown on output).
    fn writing_nulls(&self) -> bool;

    /// Feed one integer field of the current line. In full mode the first
    /// two fields of each line are the interval's start and end positions.
    fn consume(&mut self, value: u32) -> Result<()>;

    /// Compute the metric for the current line, write it, and reset all
    /// per-line state.
    fn finish_site(&mut self) -> Result<()>;

    /// Flush the underlying output sinks.
    fn flush(&mut self) -> Result<()>;
}

/// Drives `model` over every line of `reader`, returning the number of
/// lines processed. Fields are tab-separated non-negative integers; any
/// parse failure, mid-line routing failure, or column-count mismatch aborts
/// the run with a diagnostic naming the offending line (and column) of
/// `source`.
pub fn process_stream(
    reader: &mut dyn BufRead,
    source: &str,
    model: &mut dyn DivergenceModel,
) -> Result<u64> {
    let expected = if model.writing_nulls() {
        model.width()
    } else {
        model.width() + 2
    };
    let mut processed: u64 = 0;
    for (index, line) in reader.lines().enumerate() {
        let lineno = index + 1;
        let line = line.with_context(|| format!("Failed to read line {} of {}", lineno, source))?;
        let mut columns = 0usize;
        for (column, field) in line.trim_end().split('\t').enumerate() {
            let value: u32 = field.parse().with_context(|| {
                format!(
                    "Failed to parse \"{}\" as a non-negative integer \
                     (column {} of line {} of {})",
                    field,
                    column + 1,
                    lineno,
                    source
                )
            })?;
            columns += 1;
            model.consume(value).with_context(|| {
                format!("In column {} of line {} of {}", column + 1, lineno, source)
            })?;
        }
        if columns != expected {
            bail!(
                "Expected to find {} columns of integers on line {} of {}, \
                 but instead found {}",
                expected,
                lineno,
                source,
                columns
            );
        }
        model
            .finish_site()
            .with_context(|| format!("While finalizing line {} of {}", lineno, source))?;
        processed += 1;
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kl_state::StateKlModel;
    use crate::output::test_io::{full_sink, null_sink};

    fn state_model(sink: crate::output::MetricSink) -> StateKlModel {
        let mut bg: &[u8] = b"2\t2\n";
        StateKlModel::from_backgrounds((&mut bg, "q1"), None, 2, sink).unwrap()
    }

    #[test]
    fn streams_every_line_and_resets_between() {
        let (sink, obs, scores) = full_sink("chr1");
        let mut model = state_model(sink);
        let mut input: &[u8] = b"100\t200\t2\t0\n300\t400\t0\t0\n";
        let lines = process_stream(&mut input, "obs.txt", &mut model).unwrap();
        assert_eq!(lines, 2);
        assert_eq!(
            obs.contents(),
            "chr1\t100\t200\t1\t1\t1\t1\nchr1\t300\t400\t1\t0\t-1\t0\n"
        );
        assert_eq!(scores.contents(), "chr1\t100\t200\t1\t0\nchr1\t300\t400\t0\t0\n");
    }

    #[test]
    fn null_mode_expects_no_coordinate_columns() {
        let (sink, out) = null_sink();
        let mut model = state_model(sink);
        let mut input: &[u8] = b"2\t0\n0\t2\n";
        let lines = process_stream(&mut input, "perm.txt", &mut model).unwrap();
        assert_eq!(lines, 2);
        assert_eq!(out.contents(), "1\n1\n");
    }

    #[test]
    fn short_line_is_rejected_with_its_line_number() {
        let (sink, _, _) = full_sink("chr1");
        let mut model = state_model(sink);
        let mut input: &[u8] = b"100\t200\t2\t0\n300\t400\t1\n";
        let err = process_stream(&mut input, "obs.txt", &mut model).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Expected to find 4 columns"), "{}", message);
        assert!(message.contains("line 2"), "{}", message);
        assert!(message.contains("found 3"), "{}", message);
    }

    #[test]
    fn excess_columns_are_rejected_mid_line() {
        let (sink, _, _) = full_sink("chr1");
        let mut model = state_model(sink);
        let mut input: &[u8] = b"100\t200\t2\t0\t1\n";
        let err = process_stream(&mut input, "obs.txt", &mut model).unwrap_err();
        let chain = format!("{:#}", err);
        assert!(chain.contains("excess columns"), "{}", chain);
        assert!(chain.contains("column 5 of line 1"), "{}", chain);
    }

    #[test]
    fn junk_field_is_rejected_with_line_and_column() {
        let (sink, _, _) = full_sink("chr1");
        let mut model = state_model(sink);
        let mut input: &[u8] = b"100\t200\t2\tx\n";
        let err = process_stream(&mut input, "obs.txt", &mut model).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("column 4 of line 1"), "{}", message);
    }

    #[test]
    fn empty_stream_is_a_no_op() {
        let (sink, out) = null_sink();
        let mut model = state_model(sink);
        let mut input: &[u8] = b"";
        assert_eq!(process_stream(&mut input, "perm.txt", &mut model).unwrap(), 0);
        assert_eq!(out.contents(), "");
    }
}
