//! KL divergence over state pairs of individual epigenome pairs.
//!
//! Unlike the other two variants, the input is not a tally vector: each
//! column carries the raw ordered state-pair id observed by one specific
//! epigenome pair at the current site, and the background weight depends on
//! *which* epigenome pair produced the observation, not just on the pair id.
//! Observations are bucketed into canonical state-pair groups (merging
//! `(a,b)` with `(b,a)`); a group's term is the sum of the per-cell
//! background weights of everything that landed in it, positive for group 1
//! and negative for group 2.
//!
//! The per-site buckets live in a flat arena indexed by group id, allocated
//! once and cleared (touched slots only) after every line.

use anyhow::{anyhow, bail, Result};
use std::io::{BufRead, Write};

use crate::background::{self, EpiPairBackground};
use crate::engine::DivergenceModel;
use crate::output::{format_sig, max_abs_index, sign_of, write_scores_line, MetricSink};
use crate::pairs;

pub struct EpiPairKlModel {
    num_states: u32,
    group1: EpiPairGroup,
    group2: Option<EpiPairGroup>,
    site: SiteArena,
    sink: MetricSink,
    beg: Option<u32>,
    end: Option<u32>,
}

struct EpiPairGroup {
    /// `weights[pair_id - 1][epigenome_pair_id]`.
    weights: Vec<Vec<f64>>,
    epi_pairs: usize,
    filled: usize,
}

impl EpiPairGroup {
    fn new(background: EpiPairBackground) -> Self {
        EpiPairGroup {
            weights: background.weights,
            epi_pairs: background.epi_pairs,
            filled: 0,
        }
    }
}

/// Per-site observations, bucketed by canonical state-pair group id.
/// Slot 0 is unused (ids are 1-based).
struct SiteArena {
    slots: Vec<Slot>,
    touched: Vec<u32>,
}

/// Raw pair id -> the epigenome pairs that observed it, per source group.
/// At most two raw ids (the two orientations) can land in one slot.
#[derive(Clone, Default)]
struct Slot {
    group1: Vec<(u32, Vec<u32>)>,
    group2: Vec<(u32, Vec<u32>)>,
}

impl SiteArena {
    fn new(num_states: u32) -> Self {
        let n = num_states as usize;
        SiteArena {
            slots: vec![Slot::default(); n * n + 1],
            touched: Vec::new(),
        }
    }

    fn record(&mut self, group_id: u32, raw_id: u32, epi_pair: u32, second_group: bool) {
        let slot = &mut self.slots[group_id as usize];
        if slot.group1.is_empty() && slot.group2.is_empty() {
            self.touched.push(group_id);
        }
        let observations = if second_group {
            &mut slot.group2
        } else {
            &mut slot.group1
        };
        match observations.iter_mut().find(|(id, _)| *id == raw_id) {
            Some((_, epi_pairs)) => epi_pairs.push(epi_pair),
            None => observations.push((raw_id, vec![epi_pair])),
        }
    }

    fn clear(&mut self) {
        for &id in &self.touched {
            let slot = &mut self.slots[id as usize];
            slot.group1.clear();
            slot.group2.clear();
        }
        self.touched.clear();
    }
}

impl EpiPairKlModel {
    pub fn from_backgrounds(
        background1: (&mut dyn BufRead, &str),
        background2: Option<(&mut dyn BufRead, &str)>,
        n_sites: u32,
        sink: MetricSink,
    ) -> Result<Self> {
        let (reader1, name1) = background1;
        let bg1 = background::load_epi_pair_background(reader1, name1, n_sites)?;
        let num_states = bg1.num_states;
        let group2 = match background2 {
            Some((reader2, name2)) => {
                let bg2 = background::load_epi_pair_background(reader2, name2, n_sites)?;
                if bg2.num_states != num_states {
                    bail!(
                        "The group 1 background implies {} possible states, \
                         but {} (group 2) implies {}",
                        num_states,
                        name2,
                        bg2.num_states
                    );
                }
                Some(EpiPairGroup::new(bg2))
            }
            None => None,
        };
        Ok(EpiPairKlModel {
            num_states,
            site: SiteArena::new(num_states),
            group1: EpiPairGroup::new(bg1),
            group2,
            sink,
            beg: None,
            end: None,
        })
    }
}

impl DivergenceModel for EpiPairKlModel {
    fn name(&self) -> &'static str {
        "epigenome-pair KL"
    }

    fn width(&self) -> usize {
        self.group1.epi_pairs + self.group2.as_ref().map_or(0, |g| g.epi_pairs)
    }

    fn writing_nulls(&self) -> bool {
        self.sink.writing_nulls()
    }

    fn consume(&mut self, value: u32) -> Result<()> {
        if !self.writing_nulls() && self.group1.filled == 0 {
            if self.beg.is_none() {
                self.beg = Some(value);
                return Ok(());
            }
            if self.end.is_none() {
                self.end = Some(value);
                return Ok(());
            }
        }
        let second_group = if self.group1.filled < self.group1.epi_pairs {
            false
        } else {
            match &self.group2 {
                Some(group2) if group2.filled < group2.epi_pairs => true,
                Some(group2) => bail!(
                    "Found excess columns in a line of input; expected {}",
                    self.group1.epi_pairs + group2.epi_pairs
                ),
                None => bail!(
                    "Found excess columns in a line of input; expected {}",
                    self.group1.epi_pairs
                ),
            }
        };
        let max_id = self.num_states * self.num_states;
        if value == 0 || value > max_id {
            bail!(
                "State-pair id {} is outside the valid range 1..={} for {} states",
                value,
                max_id,
                self.num_states
            );
        }
        let group_id = pairs::fold_to_upper(value, self.num_states);
        let epi_pair = if second_group {
            let group2 = self
                .group2
                .as_mut()
                .ok_or_else(|| anyhow!("Routed a value to a group that does not exist"))?;
            let index = group2.filled as u32;
            group2.filled += 1;
            index
        } else {
            let index = self.group1.filled as u32;
            self.group1.filled += 1;
            index
        };
        self.site.record(group_id, value, epi_pair, second_group);
        Ok(())
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
        let mut best: Option<(u32, f64)> = None;
        self.site.touched.sort_unstable();
        for &group_id in &self.site.touched {
            let slot = &self.site.slots[group_id as usize];
            let mut term = 0.0;
            for (raw_id, epi_pairs) in &slot.group1 {
                let weights = &self.group1.weights[*raw_id as usize - 1];
                for &epi_pair in epi_pairs {
                    term += weights[epi_pair as usize];
                }
            }
            if let Some(group2) = &self.group2 {
                for (raw_id, epi_pairs) in &slot.group2 {
                    let weights = &group2.weights[*raw_id as usize - 1];
                    for &epi_pair in epi_pairs {
                        term -= weights[epi_pair as usize];
                    }
                }
            }
            if !nulls {
                let better = match best {
                    Some((_, leading)) => term.abs() > leading.abs(),
                    None => term.abs() > 0.0,
                };
                if better {
                    best = Some((group_id, term));
                }
                let (s1, s2) = pairs::group_states(group_id, self.num_states);
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
                let fallback = self.site.touched.first().copied().unwrap_or(1);
                let (best_id, best_term) = best.unwrap_or((fallback, 0.0));
                let (s1, s2) = pairs::group_states(best_id, self.num_states);
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
        self.site.clear();
        self.group1.filled = 0;
        if let Some(group2) = self.group2.as_mut() {
            group2.filled = 0;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }
}
