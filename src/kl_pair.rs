//! KL divergence over unordered state pairs.
//!
//! Tallies arrive per unique unordered state pair rather than per state, so
//! the numeric policy of the per-state variant applies over the triangular
//! pair enumeration, with the pair-count denominator `ln 2 * g*(g-1)/2`.
//! Each pair's signed term is split evenly onto its two constituent states,
//! giving the scores record the same per-state shape as the state metric.
//! The observation record additionally names the single pair with the
//! largest-magnitude term, which need not involve the state with the
//! largest accumulated total.

use anyhow::{anyhow, bail, Result};
use std::f64::consts::LN_2;
use std::io::{BufRead, Write};

use crate::background::{self, signed_term, LogCache, TallyGroup};
use crate::engine::DivergenceModel;
use crate::output::{format_sig, max_abs_index, sign_of, write_scores_line, MetricSink};
use crate::pairs;

#[derive(Debug)]
pub struct StatePairKlModel {
    num_states: u32,
    /// Unique unordered pair id -> (state, state), 1-based.
    decompositions: Vec<(u32, u32)>,
    group1: TallyGroup,
    group2: Option<TallyGroup>,
    logs: LogCache,
    sink: MetricSink,
    beg: Option<u32>,
    end: Option<u32>,
}

fn pair_capacity(group_size: u32) -> u32 {
    group_size * (group_size - 1) / 2
}

impl StatePairKlModel {
    pub fn from_backgrounds(
        background1: (&mut dyn BufRead, &str),
        background2: Option<(&mut dyn BufRead, &str)>,
        n_sites: u32,
        sink: MetricSink,
    ) -> Result<Self> {
        let (reader1, name1) = background1;
        let bg1 = background::load_pair_background(reader1, name1, n_sites)?;
        let num_states = bg1.num_states;
        let capacity1 = pair_capacity(bg1.group_size);
        let mut logs = LogCache::new();
        logs.extend_to(capacity1);
        let group1 = TallyGroup::new(bg1.weights, LN_2 * capacity1 as f64, capacity1);

        let group2 = match background2 {
            Some((reader2, name2)) => {
                let bg2 = background::load_pair_background(reader2, name2, n_sites)?;
                if bg2.num_states != num_states {
                    bail!(
                        "The group 1 background implies {} possible states, \
                         but {} (group 2) implies {}",
                        num_states,
                        name2,
                        bg2.num_states
                    );
                }
                let capacity2 = pair_capacity(bg2.group_size);
                logs.extend_to(capacity2);
                Some(TallyGroup::new(
                    bg2.weights,
                    LN_2 * capacity2 as f64,
                    capacity2,
                ))
            }
            None => None,
        };

        Ok(StatePairKlModel {
            num_states,
            decompositions: pairs::unordered_pairs(num_states),
            group1,
            group2,
            logs,
            sink,
            beg: None,
            end: None,
        })
    }
}

impl DivergenceModel for StatePairKlModel {
    fn name(&self) -> &'static str {
        "state-pair KL"
    }

    fn width(&self) -> usize {
        self.group1.len() + self.group2.as_ref().map_or(0, TallyGroup::len)
    }

    fn writing_nulls(&self) -> bool {
        self.sink.writing_nulls()
    }

    fn consume(&mut self, value: u32) -> Result<()> {
        if !self.writing_nulls() && self.group1.count() == 0 {
            if self.beg.is_none() {
                self.beg = Some(value);
                return Ok(());
            }
            if self.end.is_none() {
                self.end = Some(value);
                return Ok(());
            }
        }
        if !self.group1.is_full() {
            return self.group1.push(value);
        }
        match self.group2.as_mut() {
            Some(group2) if !group2.is_full() => group2.push(value),
            Some(group2) => bail!(
                "Found excess columns in a line of input; expected {}",
                self.group1.len() + group2.len()
            ),
            None => bail!(
                "Found excess columns in a line of input; expected {}",
                self.group1.len()
            ),
        }
    }

    fn finish_site(&mut self) -> Result<()> {
        let nulls = self.writing_nulls();
        let two_groups = self.group2.is_some();
        let mut contribs = if nulls {
            Vec::new()
        } else {
            vec![0.0; self.num_states as usize]
        };
        let mut total = 0.0;
        // (pair id, signed term) of the largest-magnitude pair so far;
        // zero-magnitude terms never qualify.
        let mut best: Option<(usize, f64)> = None;
        for id in 0..self.group1.len() {
            let term = signed_term(id, &self.group1, self.group2.as_ref(), &self.logs);
            if !nulls {
                let better = match best {
                    Some((_, leading)) => term.abs() > leading.abs(),
                    None => term.abs() > 0.0,
                };
                if better {
                    best = Some((id, term));
                }
                let (s1, s2) = self.decompositions[id];
                contribs[s1 as usize - 1] += 0.5 * term;
                contribs[s2 as usize - 1] += 0.5 * term;
            }
            total += if two_groups { term.abs() } else { term };
        }

        match &mut self.sink {
            MetricSink::Nulls(out) => writeln!(out, "{}", format_sig(total, 6))?,
            MetricSink::Full { obs, scores, chrom } => {
                let beg = self
                    .beg
                    .take()
                    .ok_or_else(|| anyhow!("Line ended before the interval start was read"))?;
                let end = self
                    .end
                    .take()
                    .ok_or_else(|| anyhow!("Line ended before the interval end was read"))?;
                let (best_id, best_term) = best.unwrap_or((0, 0.0));
                let (s1, s2) = self.decompositions[best_id];
                let top = max_abs_index(&contribs);
                writeln!(
                    obs,
                    "{}\t{}\t{}\t{}\t{}\t{}\t({},{})\t{}\t{}\t{}",
                    chrom,
                    beg,
                    end,
                    top + 1,
                    format_sig(contribs[top].abs(), 6),
                    sign_of(contribs[top]),
                    s1,
                    s2,
                    format_sig(best_term.abs(), 6),
                    sign_of(best_term),
                    format_sig(total, 6)
                )?;
                write_scores_line(scores.as_mut(), chrom, beg, end, &contribs)?;
            }
        }

        self.beg = None;
        self.end = None;
        self.group1.reset();
        if let Some(group2) = self.group2.as_mut() {
            group2.reset();
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }
}
