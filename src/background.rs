//! Genome-wide background (Q) models.
//!
//! A background file carries the genome-wide tallies of every state (or
//! state pair) for one group of epigenomes. Loading turns each tally into a
//! log-weight `ln(N) - ln(tally)` against the genome-wide site count `N`;
//! states never observed genome-wide get a large-magnitude sentinel instead,
//! so any foreground observation of them registers as maximally surprising.
//! The per-group epigenome count is reverse-engineered from the tally total,
//! since the sum over one group equals `N` times the number of epigenomes
//! (or epigenome pairs) tallied per site.
//!
//! The normalizing group-size factor inside each Q term is *not* stored:
//! every term enters the metric only through the ratio P/Q, where it cancels.
//! The epigenome-pair variant stores ready-to-use weights per (state pair,
//! epigenome pair) instead, with the `ln 2 * numRows` normalization folded
//! in at load time and a positive sentinel.

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use std::f64::consts::LN_2;
use std::io::BufRead;

use crate::pairs;

/// Weight recorded for a state (or unordered state pair) with a zero
/// genome-wide tally.
pub const MISSING_STATE_WEIGHT: f64 = -999_999.0;

/// Weight recorded for a (state pair, epigenome pair) cell with a zero
/// genome-wide tally.
pub const MISSING_PAIR_WEIGHT: f64 = 999_999.0;

/// Whether a state/pair weight is the never-observed sentinel.
pub fn is_missing(weight: f64) -> bool {
    weight < -999.0
}

/// Per-state background for one group (per-state KL).
#[derive(Debug)]
pub struct StateBackground {
    pub weights: Vec<f64>,
    pub group_size: u32,
}

/// Per-unordered-state-pair background for one group.
#[derive(Debug)]
pub struct PairBackground {
    pub weights: Vec<f64>,
    pub group_size: u32,
    pub num_states: u32,
}

/// Per-(state pair, epigenome pair) background for one group.
#[derive(Debug)]
pub struct EpiPairBackground {
    /// `weights[pair_id - 1][epigenome_pair_id]`; the input matrix arrives
    /// with epigenome pairs as rows and is transposed here.
    pub weights: Vec<Vec<f64>>,
    pub group_size: u32,
    pub num_states: u32,
    pub epi_pairs: usize,
}

/// Reads the single line of tab-delimited tallies that per-state and
/// per-state-pair background files must contain, returning the per-column
/// log-weights and the total.
fn load_tally_line(
    reader: &mut dyn BufRead,
    name: &str,
    n_sites: u32,
) -> Result<(Vec<f64>, u64)> {
    let log_n = (n_sites as f64).ln();
    let mut lines = reader.lines();
    let first = match lines.next() {
        Some(line) => line.with_context(|| format!("Failed to read {}", name))?,
        None => bail!("File {} is empty", name),
    };
    let mut weights = Vec::new();
    let mut total: u64 = 0;
    for (column, field) in first.trim_end().split('\t').enumerate() {
        let tally: u64 = field.parse().with_context(|| {
            format!(
                "Failed to parse \"{}\" (column {} of {}) as a non-negative integer",
                field,
                column + 1,
                name
            )
        })?;
        total += tally;
        weights.push(if tally == 0 {
            MISSING_STATE_WEIGHT
        } else {
            log_n - (tally as f64).ln()
        });
    }
    if lines.next().is_some() {
        bail!(
            "File {} contains multiple lines of data; \
             it should contain a single line of tab-delimited tallies",
            name
        );
    }
    Ok((weights, total))
}

/// Loads a per-state background. The column count is the number of states;
/// the tally total is `N * groupSize`.
pub fn load_state_background(
    reader: &mut dyn BufRead,
    name: &str,
    n_sites: u32,
) -> Result<StateBackground> {
    let (weights, total) = load_tally_line(reader, name, n_sites)?;
    let group_size = (total as f64 / n_sites as f64 + 0.01).floor() as u32;
    if group_size == 0 {
        bail!(
            "Background tallies in {} sum to {}, implying zero epigenomes \
             across {} genome-wide sites",
            name,
            total,
            n_sites
        );
    }
    info!(
        "Loaded state background {}: {} states, group size {}",
        name,
        weights.len(),
        group_size
    );
    Ok(StateBackground { weights, group_size })
}

/// Loads a per-unordered-state-pair background. The column count must be a
/// pair count `n*(n+1)/2`; the tally total is `N * groupSize*(groupSize-1)/2`
/// since unordered epigenome pairs, not epigenomes, are tallied per site.
pub fn load_pair_background(
    reader: &mut dyn BufRead,
    name: &str,
    n_sites: u32,
) -> Result<PairBackground> {
    let (weights, total) = load_tally_line(reader, name, n_sites)?;
    let num_states = pairs::states_for_pair_count(weights.len()).ok_or_else(|| {
        anyhow!(
            "File {} has {} columns, which is not a valid unordered \
             state-pair count n*(n+1)/2",
            name,
            weights.len()
        )
    })?;
    let per_site = total as f64 / n_sites as f64;
    let group_size = (((1.0 + 8.0 * per_site).sqrt() + 1.0) / 2.0 + 0.01).floor() as u32;
    if group_size < 2 {
        bail!(
            "Background tallies in {} imply a group of {} epigenomes; \
             a pair metric needs at least 2",
            name,
            group_size
        );
    }
    info!(
        "Loaded state-pair background {}: {} states ({} pairs), group size {}",
        name,
        num_states,
        weights.len(),
        group_size
    );
    Ok(PairBackground { weights, group_size, num_states })
}

/// Loads a per-(state pair, epigenome pair) background matrix: one row per
/// epigenome pair, `numStates^2` columns. Weights are normalized by
/// `ln 2 * numRows` here and looked up directly at scoring time.
pub fn load_epi_pair_background(
    reader: &mut dyn BufRead,
    name: &str,
    n_sites: u32,
) -> Result<EpiPairBackground> {
    let log_n = (n_sites as f64).ln();
    let mut rows: Vec<Vec<u64>> = Vec::new();
    let mut num_cols = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", name))?;
        let mut row = Vec::with_capacity(num_cols);
        for (column, field) in line.trim_end().split('\t').enumerate() {
            let tally: u64 = field.parse().with_context(|| {
                format!(
                    "Failed to parse \"{}\" (line {}, column {} of {}) \
                     as a non-negative integer",
                    field,
                    index + 1,
                    column + 1,
                    name
                )
            })?;
            row.push(tally);
        }
        if index == 0 {
            num_cols = row.len();
        } else if row.len() != num_cols {
            bail!(
                "Found {} columns on line 1 of {} but {} columns on line {}; \
                 every row must have the same number of columns, equal to the \
                 square of the number of possible states",
                num_cols,
                name,
                row.len(),
                index + 1
            );
        }
        rows.push(row);
    }
    if rows.is_empty() {
        bail!("File {} is empty", name);
    }
    let num_states = pairs::states_for_square(num_cols).ok_or_else(|| {
        anyhow!(
            "File {} has {} columns; the column count must equal the square \
             of the number of possible states",
            name,
            num_cols
        )
    })?;
    let group_size = pairs::group_size_for_pair_rows(rows.len()).ok_or_else(|| {
        anyhow!(
            "File {} has {} rows; the row count must be a valid \
             epigenome-pair count g*(g-1)/2",
            name,
            rows.len()
        )
    })?;
    let denom = LN_2 * rows.len() as f64;
    let mut weights = vec![vec![0.0; rows.len()]; num_cols];
    for (epi_pair, row) in rows.iter().enumerate() {
        for (pair, &tally) in row.iter().enumerate() {
            weights[pair][epi_pair] = if tally == 0 {
                MISSING_PAIR_WEIGHT
            } else {
                (log_n - (tally as f64).ln()) / denom
            };
        }
    }
    info!(
        "Loaded epigenome-pair background {}: {} states, {} epigenome pairs \
         (group size {})",
        name,
        num_states,
        rows.len(),
        group_size
    );
    Ok(EpiPairBackground {
        weights,
        group_size,
        num_states,
        epi_pairs: rows.len(),
    })
}

/// Cached `ln(1), ln(2), ..., ln(maxTally)`, so the logs of per-site tallies
/// are never recomputed across millions of intervals. Index 0 is an unused
/// placeholder; the cache grows monotonically when a second group needs a
/// larger range.
#[derive(Debug)]
pub struct LogCache {
    logs: Vec<f64>,
}

impl Default for LogCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCache {
    pub fn new() -> Self {
        LogCache { logs: vec![0.0] }
    }

    pub fn extend_to(&mut self, max_tally: u32) {
        for i in self.logs.len()..=max_tally as usize {
            self.logs.push((i as f64).ln());
        }
    }

    pub fn get(&self, tally: u32) -> f64 {
        self.logs[tally as usize]
    }
}

/// One group's background weights plus its per-line observation buffer.
#[derive(Debug)]
pub struct TallyGroup {
    pub weights: Vec<f64>,
    pub tallies: Vec<u32>,
    /// `ln 2 * groupSize`, or its pair-count analogue.
    pub denom: f64,
    /// Largest observable per-site tally: the group size, or its pair count.
    pub max_tally: u32,
    filled: usize,
}

impl TallyGroup {
    pub fn new(weights: Vec<f64>, denom: f64, max_tally: u32) -> Self {
        let tallies = vec![0; weights.len()];
        TallyGroup {
            weights,
            tallies,
            denom,
            max_tally,
            filled: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// How many values of the current line have been routed here.
    pub fn count(&self) -> usize {
        self.filled
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.tallies.len()
    }

    pub fn push(&mut self, tally: u32) -> Result<()> {
        if tally > self.max_tally {
            bail!(
                "Observed tally {} exceeds the maximum observable count {} \
                 for this group",
                tally,
                self.max_tally
            );
        }
        debug_assert!(!self.is_full());
        self.tallies[self.filled] = tally;
        self.filled += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.tallies.iter_mut().for_each(|t| *t = 0);
        self.filled = 0;
    }
}

/// The signed contribution of one state (or unordered state pair) at the
/// current site: group 1 pushes positive, group 2 negative. A zero observed
/// tally contributes nothing; a never-observed background state passes its
/// sentinel straight through (negated for group 2) instead of entering the
/// log-ratio, so the result is always finite.
pub fn signed_term(
    index: usize,
    group1: &TallyGroup,
    group2: Option<&TallyGroup>,
    logs: &LogCache,
) -> f64 {
    let mut term = 0.0;
    let p1 = group1.tallies[index];
    if p1 != 0 {
        let weight = group1.weights[index];
        if is_missing(weight) {
            term = weight;
        } else {
            term += (p1 as f64 / group1.denom) * (logs.get(p1) + weight);
        }
    }
    if let Some(group2) = group2 {
        let p2 = group2.tallies[index];
        if p2 != 0 {
            let weight = group2.weights[index];
            if is_missing(weight) {
                term = -weight;
            } else {
                term -= (p2 as f64 / group2.denom) * (logs.get(p2) + weight);
            }
        }
    }
    term
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn state_background_basics() {
        let mut data: &[u8] = b"2\t2\n";
        let bg = load_state_background(&mut data, "q1", 2).unwrap();
        assert_eq!(bg.group_size, 2);
        assert_eq!(bg.weights.len(), 2);
        assert!(approx_eq(bg.weights[0], 0.0, 1e-12));
        assert!(approx_eq(bg.weights[1], 0.0, 1e-12));
    }

    #[test]
    fn zero_tally_takes_the_sentinel() {
        let mut data: &[u8] = b"2\t0\n";
        let bg = load_state_background(&mut data, "q1", 2).unwrap();
        assert_eq!(bg.group_size, 1);
        assert!(is_missing(bg.weights[1]));
        assert!(bg.weights[1].is_finite());
        assert!(!is_missing(bg.weights[0]));
    }

    #[test]
    fn empty_background_is_rejected() {
        let mut data: &[u8] = b"";
        let err = load_state_background(&mut data, "q1", 2).unwrap_err();
        assert!(err.to_string().contains("is empty"), "{}", err);
    }

    #[test]
    fn multi_line_background_is_rejected() {
        let mut data: &[u8] = b"2\t2\n1\t3\n";
        let err = load_state_background(&mut data, "q1", 2).unwrap_err();
        assert!(err.to_string().contains("multiple lines"), "{}", err);
    }

    #[test]
    fn junk_field_is_rejected_with_its_column() {
        let mut data: &[u8] = b"2\tx\t3\n";
        let err = load_state_background(&mut data, "q1", 2).unwrap_err();
        let chain = format!("{:#}", err);
        assert!(chain.contains("column 2"), "{}", chain);
    }

    #[test]
    fn pair_background_derives_states_and_group_size() {
        // 3 columns -> 2 states; total 12 over N=4 -> 3 pairs/site -> group of 3.
        let mut data: &[u8] = b"8\t4\t0\n";
        let bg = load_pair_background(&mut data, "q1", 4).unwrap();
        assert_eq!(bg.num_states, 2);
        assert_eq!(bg.group_size, 3);
        assert!(is_missing(bg.weights[2]));
    }

    #[test]
    fn pair_background_rejects_non_triangular_width() {
        let mut data: &[u8] = b"1\t1\t1\t1\n";
        let err = load_pair_background(&mut data, "q1", 4).unwrap_err();
        assert!(err.to_string().contains("state-pair count"), "{}", err);
    }

    #[test]
    fn epi_pair_background_transposes_and_normalizes() {
        // 2 states, 1 row -> group of 2; denom = ln2 * 1.
        let mut data: &[u8] = b"2\t1\t4\t8\n";
        let bg = load_epi_pair_background(&mut data, "q1", 4).unwrap();
        assert_eq!(bg.num_states, 2);
        assert_eq!(bg.group_size, 2);
        assert_eq!(bg.epi_pairs, 1);
        assert!(approx_eq(bg.weights[0][0], 1.0, 1e-12));
        assert!(approx_eq(bg.weights[1][0], 2.0, 1e-12));
        assert!(approx_eq(bg.weights[2][0], 0.0, 1e-12));
        assert!(approx_eq(bg.weights[3][0], -1.0, 1e-12));
    }

    #[test]
    fn epi_pair_background_zero_cell_sentinel_is_not_normalized() {
        let mut data: &[u8] = b"0\t1\t1\t1\n1\t1\t1\t1\n2\t2\t2\t2\n";
        let bg = load_epi_pair_background(&mut data, "q1", 4).unwrap();
        assert_eq!(bg.group_size, 3);
        assert_eq!(bg.weights[0][0], MISSING_PAIR_WEIGHT);
    }

    #[test]
    fn epi_pair_background_rejects_ragged_rows() {
        let mut data: &[u8] = b"1\t1\t1\t1\n1\t1\t1\n1\t1\t1\t1\n";
        let err = load_epi_pair_background(&mut data, "q1", 4).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);
    }

    #[test]
    fn epi_pair_background_rejects_non_square_width() {
        let mut data: &[u8] = b"1\t1\t1\n";
        let err = load_epi_pair_background(&mut data, "q1", 4).unwrap_err();
        assert!(err.to_string().contains("square"), "{}", err);
    }

    #[test]
    fn log_cache_grows_monotonically() {
        let mut logs = LogCache::new();
        logs.extend_to(3);
        assert!(approx_eq(logs.get(1), 0.0, 1e-12));
        assert!(approx_eq(logs.get(2), std::f64::consts::LN_2, 1e-12));
        logs.extend_to(2); // no shrink
        assert!(approx_eq(logs.get(3), 3f64.ln(), 1e-12));
        logs.extend_to(5);
        assert!(approx_eq(logs.get(5), 5f64.ln(), 1e-12));
    }

    fn group(weights: Vec<f64>, tallies: Vec<u32>, denom: f64) -> TallyGroup {
        let mut g = TallyGroup::new(weights, denom, 10);
        for t in tallies {
            g.push(t).unwrap();
        }
        g
    }

    #[test]
    fn signed_term_single_group() {
        let mut logs = LogCache::new();
        logs.extend_to(2);
        let g1 = group(vec![0.0, 0.0], vec![2, 0], LN_2 * 2.0);
        let term = signed_term(0, &g1, None, &logs);
        assert!(approx_eq(term, 1.0, 1e-12));
        assert!(approx_eq(signed_term(1, &g1, None, &logs), 0.0, 1e-12));
    }

    #[test]
    fn signed_term_sentinel_branches() {
        let mut logs = LogCache::new();
        logs.extend_to(2);
        let g1 = group(vec![MISSING_STATE_WEIGHT], vec![1], LN_2);
        assert_eq!(signed_term(0, &g1, None, &logs), MISSING_STATE_WEIGHT);

        // A group-2 sentinel replaces the term with the positive sentinel,
        // whatever group 1 contributed.
        let g1 = group(vec![0.0], vec![1], LN_2);
        let g2 = group(vec![MISSING_STATE_WEIGHT], vec![1], LN_2);
        let term = signed_term(0, &g1, Some(&g2), &logs);
        assert_eq!(term, -MISSING_STATE_WEIGHT);
        assert!(term.is_finite());
    }

    #[test]
    fn signed_term_two_groups_subtract() {
        let mut logs = LogCache::new();
        logs.extend_to(2);
        let w2 = LN_2 - 3f64.ln();
        let g1 = group(vec![0.0, 0.0], vec![2, 0], LN_2 * 2.0);
        let g2 = group(vec![0.693147, w2], vec![0, 2], LN_2 * 2.0);
        assert!(approx_eq(signed_term(0, &g1, Some(&g2), &logs), 1.0, 1e-12));
        let expected = -(2.0 / (LN_2 * 2.0)) * (LN_2 + w2);
        assert!(approx_eq(
            signed_term(1, &g1, Some(&g2), &logs),
            expected,
            1e-12
        ));
    }

    #[test]
    fn tally_above_observable_range_is_rejected() {
        let mut g = TallyGroup::new(vec![0.0, 0.0], LN_2 * 2.0, 2);
        assert!(g.push(2).is_ok());
        let err = g.push(3).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{}", err);
    }
}
