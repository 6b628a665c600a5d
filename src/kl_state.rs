//! Per-state KL divergence.
//!
//! The simplest of the three strategies: one tally column per state, one
//! signed term per state. The observation record names the state with the
//! largest-magnitude contribution; the scores record carries every state's
//! signed contribution.

use anyhow::{anyhow, bail, Result};
use std::f64::consts::LN_2;
use std::io::{BufRead, Write};

use crate::background::{self, signed_term, LogCache, TallyGroup};
use crate::engine::DivergenceModel;
use crate::output::{format_sig, max_abs_index, sign_of, write_scores_line, MetricSink};

#[derive(Debug)]
pub struct StateKlModel {
    group1: TallyGroup,
    group2: Option<TallyGroup>,
    logs: LogCache,
    sink: MetricSink,
    beg: Option<u32>,
    end: Option<u32>,
}

impl StateKlModel {
    pub fn from_backgrounds(
        background1: (&mut dyn BufRead, &str),
        background2: Option<(&mut dyn BufRead, &str)>,
        n_sites: u32,
        sink: MetricSink,
    ) -> Result<Self> {
        let (reader1, name1) = background1;
        let bg1 = background::load_state_background(reader1, name1, n_sites)?;
        let num_states = bg1.weights.len();
        let mut logs = LogCache::new();
        logs.extend_to(bg1.group_size);
        let group1 = TallyGroup::new(bg1.weights, LN_2 * bg1.group_size as f64, bg1.group_size);

        let group2 = match background2 {
            Some((reader2, name2)) => {
                let bg2 = background::load_state_background(reader2, name2, n_sites)?;
                if bg2.weights.len() != num_states {
                    bail!(
                        "The group 1 background implies {} possible states, \
                         but {} (group 2) implies {}",
                        num_states,
                        name2,
                        bg2.weights.len()
                    );
                }
                logs.extend_to(bg2.group_size);
                Some(TallyGroup::new(
                    bg2.weights,
                    LN_2 * bg2.group_size as f64,
                    bg2.group_size,
                ))
            }
            None => None,
        };

        Ok(StateKlModel {
            group1,
            group2,
            logs,
            sink,
            beg: None,
            end: None,
        })
    }
}

impl DivergenceModel for StateKlModel {
    fn name(&self) -> &'static str {
        "state KL"
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
        let mut contribs = if nulls { Vec::new() } else { vec![0.0; self.group1.len()] };
        let mut total = 0.0;
        for i in 0..self.group1.len() {
            let term = signed_term(i, &self.group1, self.group2.as_ref(), &self.logs);
            if !nulls {
                contribs[i] = term;
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
                let top = max_abs_index(&contribs);
                writeln!(
                    obs,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    chrom,
                    beg,
                    end,
                    top + 1,
                    format_sig(contribs[top].abs(), 6),
                    sign_of(contribs[top]),
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
