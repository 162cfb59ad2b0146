//! Acquisition file reading and multi-file aggregation.
//!
//! [`TelemetryLoader`] turns an ordered list of acquisition files into one
//! [`Telemetry`] time series: files are decoded concurrently, concatenated in
//! the order they are supplied (callers provide them chronologically) and the
//! derived time series are anchored to the first record.

use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    str::FromStr,
    time::Instant,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
    channel::Channel,
    frame::{self, Frame, FrameError, HEADER_LEN, NUM_CHANNELS, NUM_SAMPLES, NUM_TEMPERATURES, RECORD_LEN},
};

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("{path}: file is {size} bytes, smaller than the {header_len} byte header")]
    FileTooSmall {
        path: PathBuf,
        size: u64,
        header_len: usize,
    },
    #[error("no telemetry files supplied")]
    NoFiles,
    #[error("failed to read a telemetry file")]
    Io(#[from] std::io::Error),
    #[error("failed to decode a record")]
    Frame(#[from] FrameError),
}

/// Onboard clock used as the authoritative time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSource {
    /// aircraft navigation feed
    Navigation,
    /// inertial navigation system
    Inertial,
}
#[derive(thiserror::Error, Debug)]
#[error("unknown time source {0:?}, expected \"nav\" or \"ins\"")]
pub struct TimeSourceParseError(String);
impl FromStr for TimeSource {
    type Err = TimeSourceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nav" | "navigation" => Ok(TimeSource::Navigation),
            "ins" | "inertial" => Ok(TimeSource::Inertial),
            _ => Err(TimeSourceParseError(s.to_string())),
        }
    }
}

/// Decoded content of a single acquisition file
#[derive(Debug, Default)]
pub struct FileRecords {
    pub comment: Option<String>,
    /// raw counts, per record, in channel storage order
    pub spectra: Vec<[[f64; NUM_SAMPLES]; NUM_CHANNELS]>,
    /// collapsed per-record shutter status (0 = light, 1 = dark)
    pub shutter: Vec<u8>,
    /// per-channel integration times [ms]
    pub integration_time: Vec<[i32; NUM_CHANNELS]>,
    pub temperature: Vec<[f64; NUM_TEMPERATURES]>,
    pub jday_nav: Vec<f64>,
    pub jday_ins: Vec<f64>,
    /// true when the record passed all frame consistency checks
    pub quality: Vec<bool>,
}
impl FileRecords {
    fn with_capacity(records: usize) -> Self {
        Self {
            comment: None,
            spectra: Vec::with_capacity(records),
            shutter: Vec::with_capacity(records),
            integration_time: Vec::with_capacity(records),
            temperature: Vec::with_capacity(records),
            jday_nav: Vec::with_capacity(records),
            jday_ins: Vec::with_capacity(records),
            quality: Vec::with_capacity(records),
        }
    }
    pub fn len(&self) -> usize {
        self.spectra.len()
    }
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
    fn push_frame(&mut self, path: &Path, index: usize, frame: &Frame) {
        let mut spectra = [[0f64; NUM_SAMPLES]; NUM_CHANNELS];
        let mut integration_time = [0i32; NUM_CHANNELS];
        for channel in Channel::iter() {
            let block = frame.block(channel);
            integration_time[channel.index()] = block.integration_time;
            for (sample, count) in spectra[channel.index()].iter_mut().zip(block.spectrum()) {
                *sample = *count as f64;
            }
        }
        let good = frame.quality();
        if !good {
            log::warn!(
                "{}: record {} failed the frame consistency checks",
                path.display(),
                index
            );
        }
        let nav = frame.nav_time.julian_day();
        let ins = frame.ins_time.julian_day();
        if nav.is_none() || ins.is_none() {
            log::warn!(
                "{}: record {} carries an unrepresentable timestamp",
                path.display(),
                index
            );
        }
        self.spectra.push(spectra);
        self.shutter.push(frame.block(Channel::ZenithSilicon).shutter);
        self.integration_time.push(integration_time);
        self.temperature.push(frame.temperatures);
        self.jday_nav.push(nav.unwrap_or(f64::NAN));
        self.jday_ins.push(ins.unwrap_or(f64::NAN));
        self.quality.push(good && nav.is_some() && ins.is_some());
    }
}

/// Builder over an ordered list of acquisition files
#[derive(Debug, Clone)]
pub struct TelemetryLoader {
    header_len: usize,
    record_len: usize,
    records_per_file: usize,
    time_source: TimeSource,
    time_offset: f64,
}
impl Default for TelemetryLoader {
    fn default() -> Self {
        Self {
            header_len: HEADER_LEN,
            record_len: RECORD_LEN,
            records_per_file: 600,
            time_source: TimeSource::Navigation,
            time_offset: 0f64,
        }
    }
}
impl TelemetryLoader {
    pub fn header_len(self, header_len: usize) -> Self {
        Self { header_len, ..self }
    }
    pub fn record_len(self, record_len: usize) -> Self {
        Self { record_len, ..self }
    }
    /// Per-file record capacity hint used to reserve the aggregation buffers
    pub fn records_per_file(self, records_per_file: usize) -> Self {
        Self {
            records_per_file,
            ..self
        }
    }
    pub fn time_source(self, time_source: TimeSource) -> Self {
        Self {
            time_source,
            ..self
        }
    }
    /// Constant offset [s] applied to the shifted copies of the time series
    pub fn time_offset(self, seconds: f64) -> Self {
        Self {
            time_offset: seconds,
            ..self
        }
    }

    /// Reads and decodes a single acquisition file
    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<FileRecords, TelemetryError> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        if size < self.header_len as u64 {
            return Err(TelemetryError::FileTooSmall {
                path: path.to_owned(),
                size,
                header_len: self.header_len,
            });
        }
        log::info!("Loading {:?}...", path);
        let now = Instant::now();
        let mut reader = BufReader::new(File::open(path)?);
        let mut header = vec![0u8; self.header_len];
        reader.read_exact(&mut header)?;
        let comment = frame::file_comment(&header);
        let data_len = if comment.is_some() {
            size - self.header_len as u64
        } else {
            log::warn!(
                "{}: header sentinel missing, reading the whole file as records",
                path.display()
            );
            reader.seek(SeekFrom::Start(0))?;
            size
        };
        let records = (data_len / self.record_len as u64) as usize;
        let residual = data_len % self.record_len as u64;
        if residual != 0 {
            log::warn!(
                "{}: {} trailing bytes do not form a whole record, dropping them",
                path.display(),
                residual
            );
        }
        let mut this = FileRecords::with_capacity(records);
        this.comment = comment;
        let mut buffer = vec![0u8; self.record_len];
        for index in 0..records {
            reader.read_exact(&mut buffer)?;
            let frame = Frame::decode(&buffer)?;
            this.push_frame(path, index, &frame);
        }
        log::info!("... {} records in {:}ms", records, now.elapsed().as_millis());
        Ok(this)
    }

    /// Loads every file and concatenates the records in file-list order
    pub fn load(&self, paths: &[PathBuf]) -> Result<Telemetry, TelemetryError> {
        if paths.is_empty() {
            return Err(TelemetryError::NoFiles);
        }
        let files: Vec<FileRecords> = paths
            .par_iter()
            .map(|path| self.read_file(path))
            .collect::<Result<_, _>>()?;
        let mut telemetry = Telemetry::with_capacity(self.records_per_file * paths.len());
        for file in files {
            telemetry.append(file);
        }
        telemetry.derive_time_series(self.time_source, self.time_offset);
        Ok(telemetry)
    }
}

/// Aggregated, time-indexed instrument records
#[derive(Debug, Default)]
pub struct Telemetry {
    /// one header comment per file, in file-list order
    pub comments: Vec<Option<String>>,
    pub spectra: Vec<[[f64; NUM_SAMPLES]; NUM_CHANNELS]>,
    pub shutter: Vec<u8>,
    pub integration_time: Vec<[i32; NUM_CHANNELS]>,
    pub temperature: Vec<[f64; NUM_TEMPERATURES]>,
    pub jday_nav: Vec<f64>,
    pub jday_ins: Vec<f64>,
    pub quality: Vec<bool>,
    /// authoritative julian-day series, from the selected time source
    pub jday: Vec<f64>,
    /// hour of day, anchored to the integer day of the first record
    pub tmhr: Vec<f64>,
    /// offset-shifted copy of `jday`, for aligning against another clock
    pub jday_shifted: Vec<f64>,
    /// offset-shifted copy of `tmhr`
    pub tmhr_shifted: Vec<f64>,
}
impl Telemetry {
    fn with_capacity(records: usize) -> Self {
        Self {
            comments: Vec::new(),
            spectra: Vec::with_capacity(records),
            shutter: Vec::with_capacity(records),
            integration_time: Vec::with_capacity(records),
            temperature: Vec::with_capacity(records),
            jday_nav: Vec::with_capacity(records),
            jday_ins: Vec::with_capacity(records),
            quality: Vec::with_capacity(records),
            jday: Vec::new(),
            tmhr: Vec::new(),
            jday_shifted: Vec::new(),
            tmhr_shifted: Vec::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.spectra.len()
    }
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }
    fn append(&mut self, file: FileRecords) {
        self.comments.push(file.comment);
        self.spectra.extend(file.spectra);
        self.shutter.extend(file.shutter);
        self.integration_time.extend(file.integration_time);
        self.temperature.extend(file.temperature);
        self.jday_nav.extend(file.jday_nav);
        self.jday_ins.extend(file.jday_ins);
        self.quality.extend(file.quality);
    }
    fn derive_time_series(&mut self, source: TimeSource, offset: f64) {
        self.jday = match source {
            TimeSource::Navigation => self.jday_nav.clone(),
            TimeSource::Inertial => self.jday_ins.clone(),
        };
        let anchor = self.jday.first().map(|jday| jday.trunc()).unwrap_or(0f64);
        self.tmhr = self.jday.iter().map(|jday| (jday - anchor) * 24.0).collect();
        self.jday_shifted = self.jday.iter().map(|jday| jday + offset / 86_400.0).collect();
        self.tmhr_shifted = self.tmhr.iter().map(|tmhr| tmhr + offset / 3_600.0).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{TimeStamp, COMMENT_LEN, COMMENT_SENTINEL};

    fn frame_at(second: i32) -> Frame {
        let time = TimeStamp {
            second,
            hour: 12,
            day: 28,
            month: 5,
            year: 2024,
            ..Default::default()
        };
        let mut frame = Frame {
            nav_time: time,
            ins_time: time,
            ..Default::default()
        };
        for (wire, block) in frame.blocks.iter_mut().enumerate() {
            block.integration_time = 100;
            block.eos = 1;
            block.reserved = 257;
            block.samples[0] = wire as i16;
        }
        frame
    }
    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("parse-radiometer-{}-{}", std::process::id(), name))
    }
    fn write_file(
        name: &str,
        comment: Option<&str>,
        frames: &[Frame],
        trailing: usize,
    ) -> PathBuf {
        let mut bytes = Vec::new();
        if let Some(comment) = comment {
            bytes.push(COMMENT_SENTINEL);
            let mut text = [0u8; COMMENT_LEN];
            text[..comment.len()].copy_from_slice(comment.as_bytes());
            bytes.extend_from_slice(&text);
            bytes.extend_from_slice(&[0, 0, 0]);
        }
        for frame in frames {
            bytes.extend(frame.encode());
        }
        bytes.extend(vec![0u8; trailing]);
        let path = temp_path(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn record_count_round_trip() {
        let frames: Vec<_> = (0..3).map(frame_at).collect();
        let path = write_file("count", Some("lab bench"), &frames, 0);
        let records = TelemetryLoader::default().read_file(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records.comment.as_deref(), Some("lab bench"));
        assert!(records.quality.iter().all(|q| *q));
        std::fs::remove_file(path).ok();
    }
    #[test]
    fn trailing_partial_record_dropped() {
        let frames: Vec<_> = (0..3).map(frame_at).collect();
        let path = write_file("partial", Some("lab bench"), &frames, RECORD_LEN / 2);
        let records = TelemetryLoader::default().read_file(&path).unwrap();
        assert_eq!(records.len(), 3);
        std::fs::remove_file(path).ok();
    }
    #[test]
    fn headerless_file() {
        let frames: Vec<_> = (0..2).map(frame_at).collect();
        let path = write_file("headerless", None, &frames, 0);
        let records = TelemetryLoader::default().read_file(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.comment, None);
        std::fs::remove_file(path).ok();
    }
    #[test]
    fn undersized_file_rejected() {
        let path = temp_path("undersized");
        std::fs::write(&path, [0u8; 10]).unwrap();
        assert!(matches!(
            TelemetryLoader::default().read_file(&path),
            Err(TelemetryError::FileTooSmall { .. })
        ));
        std::fs::remove_file(path).ok();
    }
    #[test]
    fn no_files_rejected() {
        assert!(matches!(
            TelemetryLoader::default().load(&[]),
            Err(TelemetryError::NoFiles)
        ));
    }
    #[test]
    fn aggregation_preserves_file_order() {
        let first = write_file("agg-1", Some("first"), &[frame_at(0), frame_at(1)], 0);
        let second = write_file("agg-2", Some("second"), &[frame_at(2)], 0);
        let telemetry = TelemetryLoader::default()
            .load(&[first.clone(), second.clone()])
            .unwrap();
        assert_eq!(telemetry.len(), 3);
        assert_eq!(
            telemetry.comments,
            vec![Some("first".to_string()), Some("second".to_string())]
        );
        let seconds: Vec<_> = telemetry
            .jday
            .iter()
            .map(|jday| (jday.fract() * 86_400.0).round() as i64 % 60)
            .collect();
        assert_eq!(seconds, vec![0, 1, 2]);
        std::fs::remove_file(first).ok();
        std::fs::remove_file(second).ok();
    }
    #[test]
    fn derived_time_series() {
        let path = write_file("derived", Some("derived"), &[frame_at(0), frame_at(30)], 0);
        let telemetry = TelemetryLoader::default()
            .time_offset(7_200.0)
            .load(&[path.clone()])
            .unwrap();
        // noon, anchored to the integer day of the first record
        assert!((telemetry.tmhr[0] - 12.0).abs() < 1e-6);
        for (shifted, tmhr) in telemetry.tmhr_shifted.iter().zip(&telemetry.tmhr) {
            assert!((shifted - tmhr - 2.0).abs() < 1e-9);
        }
        for (shifted, jday) in telemetry.jday_shifted.iter().zip(&telemetry.jday) {
            assert!((shifted - jday - 2.0 / 24.0).abs() < 1e-9);
        }
        std::fs::remove_file(path).ok();
    }
    #[test]
    fn time_source_selection() {
        let mut frame = frame_at(0);
        frame.ins_time.hour = 13;
        let path = write_file("source", Some("source"), &[frame], 0);
        let nav = TelemetryLoader::default().load(&[path.clone()]).unwrap();
        let ins = TelemetryLoader::default()
            .time_source(TimeSource::Inertial)
            .load(&[path.clone()])
            .unwrap();
        assert!((ins.jday[0] - nav.jday[0] - 1.0 / 24.0).abs() < 1e-9);
        std::fs::remove_file(path).ok();
    }
}
