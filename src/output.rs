//! Output sinks and number formatting.
//!
//! Sinks are injected as writable-stream capabilities so the metric engines
//! never open files themselves. A run writes either the full observation +
//! per-state score records, or bare scalar values for a null distribution.
//!
//! # Output Format
//! - Observation record: chrom, start, end, the state contributing most
//!   (1-based), its magnitude, its sign (`1`/`-1`), [for pair metrics: the
//!   state pair `(s1,s2)` with the largest term, its magnitude, its sign,]
//!   and the total metric. Magnitudes and totals carry 6 significant digits.
//! - Scores record: chrom, start, end, then every state's signed
//!   contribution at 4 significant digits.
//! - Null record: one metric value per input line, nothing else.

use anyhow::Result;
use std::io::Write;

/// Where a metric engine sends its per-interval results.
pub enum MetricSink {
    /// Real intervals: observation records plus the per-state breakdown,
    /// stamped with the chromosome label.
    Full {
        obs: Box<dyn Write>,
        scores: Box<dyn Write>,
        chrom: String,
    },
    /// Permuted input: the scalar metric only.
    Nulls(Box<dyn Write>),
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricSink::Full { chrom, .. } => {
                f.debug_struct("MetricSink::Full").field("chrom", chrom).finish()
            }
            MetricSink::Nulls(_) => f.debug_tuple("MetricSink::Nulls").finish(),
        }
    }
}

impl MetricSink {
    pub fn writing_nulls(&self) -> bool {
        matches!(self, MetricSink::Nulls(_))
    }

    pub fn flush(&mut self) -> Result<()> {
        match self {
            MetricSink::Full { obs, scores, .. } => {
                obs.flush()?;
                scores.flush()?;
            }
            MetricSink::Nulls(out) => out.flush()?,
        }
        Ok(())
    }
}

/// Writes one per-state score breakdown line.
pub fn write_scores_line(
    out: &mut dyn Write,
    chrom: &str,
    beg: u32,
    end: u32,
    contribs: &[f64],
) -> Result<()> {
    write!(out, "{}\t{}\t{}", chrom, beg, end)?;
    for contrib in contribs {
        write!(out, "\t{}", format_sig(*contrib, 4))?;
    }
    writeln!(out)?;
    Ok(())
}

/// Index of the entry with the largest absolute value, first occurrence
/// winning ties.
pub fn max_abs_index(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, value) in values.iter().enumerate().skip(1) {
        if value.abs() > values[best].abs() {
            best = i;
        }
    }
    best
}

/// Sign column of a signed contribution: `1` when group 1 dominates,
/// `-1` otherwise (zero counts as `-1`).
pub fn sign_of(value: f64) -> &'static str {
    if value > 0.0 {
        "1"
    } else {
        "-1"
    }
}

/// Formats `value` to `digits` significant digits in the C `%g` convention:
/// fixed notation when the decimal exponent is in `[-4, digits)`, scientific
/// otherwise, trailing zeros stripped either way.
pub fn format_sig(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return format!("{}", value);
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let digits = digits.max(1);
    // The exponential rendering fixes the decimal exponent after rounding,
    // which drives the fixed-vs-scientific choice.
    let rendered = format!("{:.*e}", digits - 1, value);
    let (mantissa, exp_str) = rendered.split_once('e').unwrap_or((rendered.as_str(), "0"));
    let exponent: i32 = exp_str.parse().unwrap_or(0);
    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exponent.abs())
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value))
    }
}

fn trim_zeros(rendered: &str) -> String {
    if rendered.contains('.') {
        rendered.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        rendered.to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_io {
    use super::MetricSink;
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    /// In-memory sink that can be handed out as `Box<dyn Write>` while the
    /// test keeps a handle for reading back what was written.
    #[derive(Clone, Default)]
    pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl SharedBuf {
        pub fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).expect("utf8 output")
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A full-mode sink plus handles onto both of its buffers.
    pub fn full_sink(chrom: &str) -> (MetricSink, SharedBuf, SharedBuf) {
        let obs = SharedBuf::default();
        let scores = SharedBuf::default();
        let sink = MetricSink::Full {
            obs: Box::new(obs.clone()),
            scores: Box::new(scores.clone()),
            chrom: chrom.to_string(),
        };
        (sink, obs, scores)
    }

    /// A null-mode sink plus a handle onto its buffer.
    pub fn null_sink() -> (MetricSink, SharedBuf) {
        let out = SharedBuf::default();
        let sink = MetricSink::Nulls(Box::new(out.clone()));
        (sink, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_significant_digits() {
        assert_eq!(format_sig(0.0, 4), "0");
        assert_eq!(format_sig(1.0, 4), "1");
        assert_eq!(format_sig(0.5, 4), "0.5");
        assert_eq!(format_sig(123.45, 4), "123.5");
        assert_eq!(format_sig(0.001234, 4), "0.001234");
        assert_eq!(format_sig(-0.25, 4), "-0.25");
        assert_eq!(format_sig(1234567.0, 4), "1.235e+06");
        assert_eq!(format_sig(0.00001234, 4), "1.234e-05");
        assert_eq!(format_sig(-999999.0, 4), "-1e+06");
    }

    #[test]
    fn rounding_can_bump_the_exponent() {
        assert_eq!(format_sig(9999.9, 4), "1e+04");
        assert_eq!(format_sig(0.000099999, 4), "0.0001");
    }

    #[test]
    fn six_significant_digits() {
        assert_eq!(format_sig(999999.0, 6), "999999");
        assert_eq!(format_sig(-999999.0, 6), "-999999");
        assert_eq!(format_sig(std::f64::consts::LN_2, 6), "0.693147");
        assert_eq!(format_sig(1.4150374992788438, 6), "1.41504");
    }

    #[test]
    fn max_abs_prefers_first_on_ties() {
        assert_eq!(max_abs_index(&[0.0, 0.0, 0.0]), 0);
        assert_eq!(max_abs_index(&[1.0, -1.0, 0.5]), 0);
        assert_eq!(max_abs_index(&[0.5, -2.0, 2.0]), 1);
    }

    #[test]
    fn sign_column() {
        assert_eq!(sign_of(0.25), "1");
        assert_eq!(sign_of(-0.25), "-1");
        assert_eq!(sign_of(0.0), "-1");
    }
}
