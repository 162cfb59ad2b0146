//! Shutter-cycle dark current correction.
//!
//! For every light cycle bracketed by two dark cycles, a per-spectral-sample
//! straight line is fitted through the flanks of the bracketing dark cycles
//! and subtracted from the raw counts. Records that cannot be bracketed, or
//! whose cycles are too short to fit, carry the fill-value sentinel instead.
//! A series with a single shutter state falls back to a trimmed whole-series
//! mean, a crude baseline kept for bench characterization runs.

use std::{collections::BTreeMap, str::FromStr};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
    channel::Channel,
    cycles::{self, CycleError, DarkCycles, Segmentation},
    frame::NUM_SAMPLES,
    telemetry::Telemetry,
};

#[derive(thiserror::Error, Debug)]
pub enum CorrectionError {
    #[error("unsupported correction mode {0:?}, expected \"interpolate\" or \"mean\"")]
    UnknownMode(String),
    #[error("shutter cycle segmentation failed")]
    Cycle(#[from] CycleError),
    #[error("time, shutter and spectra series differ in length")]
    LengthMismatch,
}

/// Dark baseline estimation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionMode {
    /// straight-line fit through the dark cycles bracketing each light cycle
    #[default]
    Interpolate,
    /// trimmed whole-series mean broadcast to every record
    Mean,
}
impl FromStr for CorrectionMode {
    type Err = CorrectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interpolate" => Ok(CorrectionMode::Interpolate),
            "mean" => Ok(CorrectionMode::Mean),
            _ => Err(CorrectionError::UnknownMode(s.to_string())),
        }
    }
}

/// Dark correction settings, passed explicitly into every correction call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    pub mode: CorrectionMode,
    /// samples trimmed off the outer edge of each bracketing dark cycle
    pub dark_extend: usize,
    /// samples trimmed off both edges of each light cycle
    pub light_extend: usize,
    /// minimum surviving samples per dark flank to attempt a fit
    pub dark_threshold: usize,
    /// minimum surviving samples per trimmed light cycle to attempt a fit
    pub light_threshold: usize,
    /// sentinel stored where no valid correction exists; must be a value the
    /// spectra cannot legitimately take
    pub fill_value: f64,
}
impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            mode: CorrectionMode::default(),
            dark_extend: 2,
            light_extend: 2,
            dark_threshold: 5,
            light_threshold: 10,
            fill_value: -99_999.0,
        }
    }
}

/// Dark-corrected output for one contiguous sub-series
#[derive(Debug)]
pub struct SeriesCorrection {
    /// raw counts minus the interpolated dark baseline, fill value elsewhere
    pub corrected: Vec<[f64; NUM_SAMPLES]>,
    /// per-sample standard deviation of the flank counts used in the fit
    pub baseline_std: Vec<[f64; NUM_SAMPLES]>,
    /// true where a valid correction was computed
    pub valid: Vec<bool>,
}

/// Dark-corrects one channel sub-series sharing a single integration time
pub fn dark_correction(
    tmhr: &[f64],
    shutter: &[u8],
    spectra: &[[f64; NUM_SAMPLES]],
    config: &CorrectionConfig,
) -> Result<SeriesCorrection, CorrectionError> {
    if tmhr.len() != shutter.len() || tmhr.len() != spectra.len() {
        return Err(CorrectionError::LengthMismatch);
    }
    let segmentation = cycles::segment(shutter)?;
    match (config.mode, segmentation) {
        (CorrectionMode::Mean, segmentation) => Ok(mean_correction(spectra, &segmentation, config)),
        (CorrectionMode::Interpolate, Segmentation::Uniform(state)) => {
            log::warn!(
                "only one shutter state ({}) present, falling back to the mean baseline",
                if state == 1 { "dark" } else { "light" }
            );
            Ok(mean_correction(spectra, &Segmentation::Uniform(state), config))
        }
        (CorrectionMode::Interpolate, Segmentation::Cycles(cycles)) => {
            Ok(interpolate_correction(tmhr, spectra, &cycles, config))
        }
    }
}

/// Trimmed whole-series mean, broadcast to every record. Not a true dark
/// subtraction: the output is the baseline itself.
fn mean_correction(
    spectra: &[[f64; NUM_SAMPLES]],
    segmentation: &Segmentation,
    config: &CorrectionConfig,
) -> SeriesCorrection {
    let n = spectra.len();
    let extend = match segmentation {
        Segmentation::Uniform(state) if *state == 1 => config.dark_extend,
        _ => config.light_extend,
    };
    let trimmed = if n > 2 * extend {
        extend..n - extend
    } else {
        log::warn!(
            "series of {} records is too short to trim {} samples at each end, using the whole series",
            n,
            extend
        );
        0..n
    };
    let count = trimmed.len() as f64;
    let mut mean = [0f64; NUM_SAMPLES];
    for row in &spectra[trimmed] {
        for (mean, count) in mean.iter_mut().zip(row.iter()) {
            *mean += count;
        }
    }
    mean.iter_mut().for_each(|mean| *mean /= count);
    SeriesCorrection {
        corrected: vec![mean; n],
        baseline_std: vec![[config.fill_value; NUM_SAMPLES]; n],
        valid: vec![true; n],
    }
}

fn interpolate_correction(
    tmhr: &[f64],
    spectra: &[[f64; NUM_SAMPLES]],
    cycles: &DarkCycles,
    config: &CorrectionConfig,
) -> SeriesCorrection {
    let n = tmhr.len();
    let fill = config.fill_value;
    let mut corrected = vec![[fill; NUM_SAMPLES]; n];
    let mut baseline_std = vec![[fill; NUM_SAMPLES]; n];
    let mut assigned = vec![false; n];
    let mut masked = vec![false; n];
    if cycles.len() < 2 {
        log::warn!("fewer than two dark cycles, no light cycle can be bracketed");
        return SeriesCorrection {
            corrected,
            baseline_std,
            valid: vec![false; n],
        };
    }
    let dark_extend = config.dark_extend;
    let light_extend = config.light_extend;
    // nothing can be bracketed before the first dark cycle's trimmed start
    // or from the last dark cycle's trimmed end on
    mask_span(&mut masked, 0, cycles.left[0] + dark_extend);
    mask_span(
        &mut masked,
        cycles.right[cycles.len() - 1].saturating_sub(dark_extend),
        n,
    );
    let mut failed: Vec<(usize, usize)> = Vec::new();
    for pair in 0..cycles.len() - 1 {
        let (dark_l, dark_r) = (cycles.left[pair], cycles.right[pair]);
        let (next_l, next_r) = (cycles.left[pair + 1], cycles.right[pair + 1]);
        // the flanks survive the outer-edge trims, the target light cycle
        // survives a trim on both sides
        let left_flank = (dark_l + dark_extend).min(dark_r)..dark_r;
        let right_flank = next_l..next_r.saturating_sub(dark_extend).max(next_l);
        let light =
            (dark_r + light_extend).min(next_l)..next_l.saturating_sub(light_extend).max(dark_r);
        mask_span(&mut masked, dark_l, left_flank.start);
        mask_span(&mut masked, dark_r, light.start);
        mask_span(&mut masked, light.end.max(light.start), next_l);
        mask_span(&mut masked, right_flank.end, next_r);
        if light.len() <= config.light_threshold
            || left_flank.len() <= config.dark_threshold
            || right_flank.len() <= config.dark_threshold
        {
            failed.push((dark_l, next_r));
            continue;
        }
        let x: Vec<f64> = tmhr[left_flank.clone()]
            .iter()
            .chain(tmhr[right_flank.clone()].iter())
            .copied()
            .collect();
        for sample in 0..NUM_SAMPLES {
            let y: Vec<f64> = spectra[left_flank.clone()]
                .iter()
                .chain(spectra[right_flank.clone()].iter())
                .map(|row| row[sample])
                .collect();
            let (slope, intercept) = linear_fit(&x, &y);
            let std = std_dev(&y);
            for record in dark_l..next_l {
                corrected[record][sample] = spectra[record][sample] - (slope * tmhr[record] + intercept);
                baseline_std[record][sample] = std;
            }
        }
        for record in dark_l..next_l {
            assigned[record] = true;
        }
    }
    // a failed pair invalidates its whole span, including flanks a
    // neighboring pair corrected
    for (from, to) in failed {
        mask_span(&mut masked, from, to);
    }
    let valid: Vec<bool> = assigned
        .iter()
        .zip(masked.iter())
        .map(|(assigned, masked)| *assigned && !masked)
        .collect();
    for (record, valid) in valid.iter().enumerate() {
        if !valid {
            corrected[record] = [fill; NUM_SAMPLES];
            baseline_std[record] = [fill; NUM_SAMPLES];
        }
    }
    SeriesCorrection {
        corrected,
        baseline_std,
        valid,
    }
}

fn mask_span(masked: &mut [bool], from: usize, to: usize) {
    let n = masked.len();
    let (from, to) = (from.min(n), to.min(n));
    if from < to {
        for state in &mut masked[from..to] {
            *state = true;
        }
    }
}

/// Ordinary least squares through `(x, y)`, as `(slope, intercept)`
fn linear_fit(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|x| (x - x_mean).powi(2)).sum();
    let sxy: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();
    if sxx == 0f64 {
        (0f64, y_mean)
    } else {
        let slope = sxy / sxx;
        (slope, y_mean - slope * x_mean)
    }
}

fn std_dev(y: &[f64]) -> f64 {
    let n = y.len() as f64;
    let mean = y.iter().sum::<f64>() / n;
    (y.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// One (channel, integration time) correction unit
#[derive(Debug)]
pub struct GroupCorrection {
    pub channel: Channel,
    /// integration time [ms] shared by every record of the group
    pub integration_time: i32,
    /// record indices of the group within the aggregate series
    pub indices: Vec<usize>,
    pub tmhr: Vec<f64>,
    pub correction: SeriesCorrection,
}

/// Dark correction of a whole [`Telemetry`] series
#[derive(Debug)]
pub struct DarkCorrection {
    pub groups: Vec<GroupCorrection>,
    fill_value: f64,
    records: usize,
}
impl DarkCorrection {
    /// Corrected spectra in the shape of [`Telemetry::spectra`], fill value
    /// where no correction applies
    pub fn overlay(&self) -> Vec<[[f64; NUM_SAMPLES]; crate::frame::NUM_CHANNELS]> {
        let mut overlay =
            vec![[[self.fill_value; NUM_SAMPLES]; crate::frame::NUM_CHANNELS]; self.records];
        for group in &self.groups {
            let channel = group.channel.index();
            for (row, &record) in group.correction.corrected.iter().zip(&group.indices) {
                overlay[record][channel] = *row;
            }
        }
        overlay
    }
}

impl Telemetry {
    /// Distinct integration times observed on each channel, with the record
    /// indices they cover
    pub fn channel_groups(&self) -> Vec<(Channel, i32, Vec<usize>)> {
        let mut groups = Vec::new();
        for channel in Channel::iter() {
            let mut by_time: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
            for (record, integration_time) in self.integration_time.iter().enumerate() {
                by_time
                    .entry(integration_time[channel.index()])
                    .or_default()
                    .push(record);
            }
            groups.extend(
                by_time
                    .into_iter()
                    .map(|(integration_time, indices)| (channel, integration_time, indices)),
            );
        }
        groups
    }

    /// Dark-corrects the four channels independently, every distinct
    /// integration time on a channel forming its own correction unit
    pub fn dark_correction(
        &self,
        config: &CorrectionConfig,
    ) -> Result<DarkCorrection, CorrectionError> {
        let groups = self
            .channel_groups()
            .into_par_iter()
            .map(|(channel, integration_time, indices)| {
                let tmhr: Vec<f64> = indices.iter().map(|&record| self.tmhr[record]).collect();
                let shutter: Vec<u8> =
                    indices.iter().map(|&record| self.shutter[record]).collect();
                let spectra: Vec<[f64; NUM_SAMPLES]> = indices
                    .iter()
                    .map(|&record| self.spectra[record][channel.index()])
                    .collect();
                log::info!(
                    "dark correction: {} @ {} ms, {} records",
                    channel,
                    integration_time,
                    indices.len()
                );
                dark_correction(&tmhr, &shutter, &spectra, config).map(|correction| {
                    GroupCorrection {
                        channel,
                        integration_time,
                        indices,
                        tmhr,
                        correction,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DarkCorrection {
            groups,
            fill_value: config.fill_value,
            records: self.len(),
        })
    }
}
