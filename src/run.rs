//! Run orchestration: opens the inputs, builds the selected metric model,
//! and drives the observation stream through it. One invocation handles one
//! chromosome; parallelism across chromosomes lives entirely in the batch
//! layer that launches this program.

use anyhow::Result;
use log::info;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::engine::{self, DivergenceModel};
use crate::input;
use crate::kl_epipair::EpiPairKlModel;
use crate::kl_pair::StatePairKlModel;
use crate::kl_state::StateKlModel;
use crate::output::MetricSink;

/// Which of the three divergence strategies to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// Per-state KL (selector 1).
    StateKl,
    /// KL over unordered state pairs (selector 2).
    StatePairKl,
    /// KL over state pairs of individual epigenome pairs (selector 3).
    EpiPairKl,
}

impl MetricKind {
    pub fn from_selector(value: u32) -> Option<Self> {
        match value {
            1 => Some(MetricKind::StateKl),
            2 => Some(MetricKind::StatePairKl),
            3 => Some(MetricKind::EpiPairKl),
            _ => None,
        }
    }
}

/// A full-mode run: score real intervals and break the metric down by state.
pub struct ScoreJob {
    pub infile: PathBuf,
    pub metric: MetricKind,
    pub n_sites: u32,
    pub background1: PathBuf,
    pub background2: Option<PathBuf>,
    pub obs_out: PathBuf,
    pub scores_out: PathBuf,
    pub chrom: String,
}

/// A null-mode run: one scalar per line of pre-permuted input.
pub struct NullJob {
    pub infile: PathBuf,
    pub metric: MetricKind,
    pub n_sites: u32,
    pub background1: PathBuf,
    pub background2: PathBuf,
    pub nulls_out: PathBuf,
}

pub fn run_score(job: &ScoreJob) -> Result<()> {
    let sink = MetricSink::Full {
        obs: input::create_writer(&job.obs_out)?,
        scores: input::create_writer(&job.scores_out)?,
        chrom: job.chrom.clone(),
    };
    let mut model = build_model(
        job.metric,
        &job.background1,
        job.background2.as_deref(),
        job.n_sites,
        sink,
    )?;
    let mut reader = input::get_reader(&job.infile)?;
    let source = job.infile.display().to_string();
    let lines = engine::process_stream(reader.as_mut(), &source, model.as_mut())?;
    model.flush()?;
    info!("{}: scored {} intervals from {}", model.name(), lines, source);
    Ok(())
}

pub fn run_null(job: &NullJob) -> Result<()> {
    let sink = MetricSink::Nulls(input::create_writer(&job.nulls_out)?);
    let mut model = build_model(
        job.metric,
        &job.background1,
        Some(&job.background2),
        job.n_sites,
        sink,
    )?;
    let mut reader = input::get_reader(&job.infile)?;
    let source = job.infile.display().to_string();
    let lines = engine::process_stream(reader.as_mut(), &source, model.as_mut())?;
    model.flush()?;
    info!(
        "{}: wrote {} null metric values from {}",
        model.name(),
        lines,
        source
    );
    Ok(())
}

fn build_model(
    metric: MetricKind,
    background1: &Path,
    background2: Option<&Path>,
    n_sites: u32,
    sink: MetricSink,
) -> Result<Box<dyn DivergenceModel>> {
    let mut reader1 = input::get_reader(background1)?;
    let name1 = background1.display().to_string();
    let mut second = match background2 {
        Some(path) => Some((input::get_reader(path)?, path.display().to_string())),
        None => None,
    };
    let background2: Option<(&mut dyn BufRead, &str)> = match &mut second {
        Some((reader, name)) => Some((&mut **reader, name.as_str())),
        None => None,
    };
    let background1: (&mut dyn BufRead, &str) = (&mut *reader1, name1.as_str());
    let model: Box<dyn DivergenceModel> = match metric {
        MetricKind::StateKl => Box::new(StateKlModel::from_backgrounds(
            background1,
            background2,
            n_sites,
            sink,
        )?),
        MetricKind::StatePairKl => Box::new(StatePairKlModel::from_backgrounds(
            background1,
            background2,
            n_sites,
            sink,
        )?),
        MetricKind::EpiPairKl => Box::new(EpiPairKlModel::from_backgrounds(
            background1,
            background2,
            n_sites,
            sink,
        )?),
    };
    Ok(model)
}
