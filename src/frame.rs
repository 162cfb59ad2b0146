//! Binary instrument record decoding.
//!
//! Each acquisition file carries an optional 148 byte comment header followed
//! by fixed-size 2276 byte records: two onboard-clock timestamps, eleven
//! housekeeping temperatures and four spectrometer channel blocks. All fields
//! are little-endian. [`Frame::decode`] and [`Frame::encode`] walk the same
//! field sequence, so the byte layout is declared once and the encoder stays
//! available to synthesize records.

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::NaiveDate;
use strum::IntoEnumIterator;

use crate::channel::Channel;

/// File header size [bytes]: sentinel, comment text, three reserved bytes
pub const HEADER_LEN: usize = 148;
/// Data record size [bytes]
pub const RECORD_LEN: usize = 2 * TimeStamp::LEN + 4 + 8 * NUM_TEMPERATURES + NUM_CHANNELS * ChannelBlock::LEN;
pub const NUM_CHANNELS: usize = 4;
/// Spectral samples per channel
pub const NUM_SAMPLES: usize = 256;
pub const NUM_TEMPERATURES: usize = 11;
/// On-wire spectrum length; the leading null sample carries the wire channel id
pub const WIRE_SAMPLES: usize = NUM_SAMPLES + 1;
/// First byte of a file that carries a comment header
pub const COMMENT_SENTINEL: u8 = 144;
pub const COMMENT_LEN: usize = 144;
/// Storage position to wire block position (zen-si, zen-in, nad-si, nad-in)
pub const CHANNEL_ORDER: [usize; NUM_CHANNELS] = [0, 2, 1, 3];

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("record buffer is {got} bytes, expected {expected}")]
    Length { expected: usize, got: usize },
    #[error("failed to read a record field")]
    Io(#[from] io::Error),
}

/// One onboard-clock timestamp group
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TimeStamp {
    pub frac_second: f64,
    pub second: i32,
    pub minute: i32,
    pub hour: i32,
    pub day: i32,
    pub month: i32,
    pub year: i32,
    pub day_of_week: i32,
    pub day_of_year: i32,
    pub dst: i32,
}
impl TimeStamp {
    pub const LEN: usize = 8 + 9 * 4;

    fn read(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            frac_second: cursor.read_f64::<LittleEndian>()?,
            second: cursor.read_i32::<LittleEndian>()?,
            minute: cursor.read_i32::<LittleEndian>()?,
            hour: cursor.read_i32::<LittleEndian>()?,
            day: cursor.read_i32::<LittleEndian>()?,
            month: cursor.read_i32::<LittleEndian>()?,
            year: cursor.read_i32::<LittleEndian>()?,
            day_of_week: cursor.read_i32::<LittleEndian>()?,
            day_of_year: cursor.read_i32::<LittleEndian>()?,
            dst: cursor.read_i32::<LittleEndian>()?,
        })
    }
    fn write(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.frac_second.to_le_bytes());
        for field in [
            self.second,
            self.minute,
            self.hour,
            self.day,
            self.month,
            self.year,
            self.day_of_week,
            self.day_of_year,
            self.dst,
        ] {
            buffer.extend_from_slice(&field.to_le_bytes());
        }
    }
    /// Days elapsed since 0001-01-01 00:00 plus one (the proleptic Gregorian
    /// ordinal of the date, with a fractional part), or `None` when the civil
    /// fields do not form a valid instant. The fractional second is rounded
    /// to microseconds before the conversion.
    pub fn julian_day(&self) -> Option<f64> {
        let micros = (self.frac_second * 1e6).round();
        if !(0.0..1e6).contains(&micros) {
            return None;
        }
        let instant = NaiveDate::from_ymd_opt(
            self.year,
            u32::try_from(self.month).ok()?,
            u32::try_from(self.day).ok()?,
        )?
        .and_hms_micro_opt(
            u32::try_from(self.hour).ok()?,
            u32::try_from(self.minute).ok()?,
            u32::try_from(self.second).ok()?,
            micros as u32,
        )?;
        let epoch = NaiveDate::from_ymd_opt(1, 1, 1)?.and_hms_opt(0, 0, 0)?;
        Some((instant - epoch).num_microseconds()? as f64 / 86_400e6 + 1.0)
    }
}

/// One spectrometer channel block, in wire order
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBlock {
    /// integration time [ms]
    pub integration_time: i32,
    /// 0 = open (light), 1 = closed (dark)
    pub shutter: u8,
    /// end-of-spectrum marker, 1 on a healthy record
    pub eos: u8,
    /// reserved sample count, 257 on a healthy record
    pub reserved: i32,
    pub samples: [i16; WIRE_SAMPLES],
}
impl Default for ChannelBlock {
    fn default() -> Self {
        Self {
            integration_time: 0,
            shutter: 0,
            eos: 1,
            reserved: WIRE_SAMPLES as i32,
            samples: [0; WIRE_SAMPLES],
        }
    }
}
impl ChannelBlock {
    pub const LEN: usize = 4 + 1 + 1 + 4 + 2 * WIRE_SAMPLES;

    fn read(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let integration_time = cursor.read_i32::<LittleEndian>()?;
        let shutter = cursor.read_u8()?;
        let eos = cursor.read_u8()?;
        let reserved = cursor.read_i32::<LittleEndian>()?;
        let mut samples = [0i16; WIRE_SAMPLES];
        cursor.read_i16_into::<LittleEndian>(&mut samples)?;
        Ok(Self {
            integration_time,
            shutter,
            eos,
            reserved,
            samples,
        })
    }
    fn write(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.integration_time.to_le_bytes());
        buffer.push(self.shutter);
        buffer.push(self.eos);
        buffer.extend_from_slice(&self.reserved.to_le_bytes());
        for sample in self.samples {
            buffer.extend_from_slice(&sample.to_le_bytes());
        }
    }
    /// Wire channel id carried in the leading null sample
    pub fn channel_id(&self) -> i16 {
        self.samples[0]
    }
    /// The 256 spectral samples [counts]
    pub fn spectrum(&self) -> &[i16] {
        &self.samples[1..]
    }
}

/// One decoded instrument record
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Frame {
    /// aircraft navigation clock
    pub nav_time: TimeStamp,
    /// inertial navigation system clock
    pub ins_time: TimeStamp,
    pub reserved: i32,
    /// housekeeping temperatures [Celsius]
    pub temperatures: [f64; NUM_TEMPERATURES],
    /// channel blocks in wire order
    pub blocks: [ChannelBlock; NUM_CHANNELS],
}
impl Frame {
    /// Decodes one record from a buffer of exactly [`RECORD_LEN`] bytes
    pub fn decode(buffer: &[u8]) -> Result<Self, FrameError> {
        if buffer.len() != RECORD_LEN {
            return Err(FrameError::Length {
                expected: RECORD_LEN,
                got: buffer.len(),
            });
        }
        let mut cursor = Cursor::new(buffer);
        let nav_time = TimeStamp::read(&mut cursor)?;
        let ins_time = TimeStamp::read(&mut cursor)?;
        let reserved = cursor.read_i32::<LittleEndian>()?;
        let mut temperatures = [0f64; NUM_TEMPERATURES];
        cursor.read_f64_into::<LittleEndian>(&mut temperatures)?;
        let blocks = [
            ChannelBlock::read(&mut cursor)?,
            ChannelBlock::read(&mut cursor)?,
            ChannelBlock::read(&mut cursor)?,
            ChannelBlock::read(&mut cursor)?,
        ];
        Ok(Self {
            nav_time,
            ins_time,
            reserved,
            temperatures,
            blocks,
        })
    }
    /// Encodes the record back into its [`RECORD_LEN`] byte wire form
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(RECORD_LEN);
        self.nav_time.write(&mut buffer);
        self.ins_time.write(&mut buffer);
        buffer.extend_from_slice(&self.reserved.to_le_bytes());
        for temperature in self.temperatures {
            buffer.extend_from_slice(&temperature.to_le_bytes());
        }
        for block in &self.blocks {
            block.write(&mut buffer);
        }
        buffer
    }
    /// Block of a channel, resolved through the wire permutation
    pub fn block(&self, channel: Channel) -> &ChannelBlock {
        &self.blocks[channel.wire_position()]
    }
    /// Cross-field consistency checks: uniform shutter flag, end-of-spectrum
    /// markers, reserved sample counts and the channel order permutation.
    /// A failing record is kept but flagged bad.
    pub fn quality(&self) -> bool {
        let shutter = self
            .blocks
            .iter()
            .all(|block| block.shutter == self.blocks[0].shutter);
        let eos = self.blocks.iter().all(|block| block.eos == 1);
        let reserved = self
            .blocks
            .iter()
            .all(|block| block.reserved == WIRE_SAMPLES as i32);
        let order = Channel::iter()
            .all(|channel| self.block(channel).channel_id() == channel.wire_position() as i16);
        shutter && eos && reserved && order
    }
}

/// Extracts the comment string from a file header, `None` when the sentinel
/// byte is absent and the file is to be read as headerless
pub fn file_comment(header: &[u8]) -> Option<String> {
    if header.len() >= 1 + COMMENT_LEN && header[0] == COMMENT_SENTINEL {
        let text = String::from_utf8_lossy(&header[1..1 + COMMENT_LEN]);
        Some(text.trim_end_matches('\0').trim_end().to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        let nav_time = TimeStamp {
            frac_second: 0.25,
            second: 30,
            minute: 15,
            hour: 12,
            day: 28,
            month: 5,
            year: 2024,
            day_of_week: 2,
            day_of_year: 149,
            dst: 0,
        };
        let mut frame = Frame {
            nav_time,
            ins_time: TimeStamp {
                frac_second: 0.75,
                ..nav_time
            },
            reserved: 0,
            temperatures: [21.5; NUM_TEMPERATURES],
            blocks: Default::default(),
        };
        for (wire, block) in frame.blocks.iter_mut().enumerate() {
            block.integration_time = 100;
            block.shutter = 0;
            block.eos = 1;
            block.reserved = 257;
            block.samples[0] = wire as i16;
            for (sample, count) in block.samples[1..].iter_mut().enumerate() {
                *count = (sample % 100) as i16 + 10 * wire as i16;
            }
        }
        frame
    }

    #[test]
    fn record_length() {
        assert_eq!(RECORD_LEN, 2276);
        assert_eq!(sample_frame().encode().len(), RECORD_LEN);
    }
    #[test]
    fn round_trip() {
        let frame = sample_frame();
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }
    #[test]
    fn round_trip_random_spectra() {
        use rand::{rngs::StdRng, Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(20240528);
        let mut frame = sample_frame();
        for block in frame.blocks.iter_mut() {
            for count in block.samples[1..].iter_mut() {
                *count = rng.gen();
            }
        }
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }
    #[test]
    fn wrong_buffer_length() {
        assert!(matches!(
            Frame::decode(&[0u8; 100]),
            Err(FrameError::Length { .. })
        ));
    }
    #[test]
    fn block_permutation() {
        let frame = sample_frame();
        assert_eq!(frame.block(Channel::ZenithSilicon).channel_id(), 0);
        assert_eq!(frame.block(Channel::ZenithInGaAs).channel_id(), 2);
        assert_eq!(frame.block(Channel::NadirSilicon).channel_id(), 1);
        assert_eq!(frame.block(Channel::NadirInGaAs).channel_id(), 3);
    }
    #[test]
    fn healthy_record_quality() {
        assert!(sample_frame().quality());
    }
    #[test]
    fn bad_end_of_spectrum() {
        let mut frame = sample_frame();
        frame.blocks[2].eos = 0;
        assert!(!frame.quality());
    }
    #[test]
    fn bad_reserved_count() {
        let mut frame = sample_frame();
        frame.blocks[1].reserved = 256;
        assert!(!frame.quality());
    }
    #[test]
    fn nonuniform_shutter() {
        let mut frame = sample_frame();
        frame.blocks[3].shutter = 1;
        assert!(!frame.quality());
    }
    #[test]
    fn swapped_channel_order() {
        let mut frame = sample_frame();
        frame.blocks[0].samples[0] = 1;
        frame.blocks[1].samples[0] = 0;
        assert!(!frame.quality());
    }
    #[test]
    fn julian_day_epoch() {
        let epoch = TimeStamp {
            day: 1,
            month: 1,
            year: 1,
            ..Default::default()
        };
        assert_eq!(epoch.julian_day(), Some(1.0));
    }
    #[test]
    fn julian_day_unix_epoch() {
        let unix = TimeStamp {
            day: 1,
            month: 1,
            year: 1970,
            ..Default::default()
        };
        assert!((unix.julian_day().unwrap() - 719_163.0).abs() < 1e-6);
    }
    #[test]
    fn julian_day_half_day() {
        let midnight = TimeStamp {
            day: 28,
            month: 5,
            year: 2024,
            ..Default::default()
        };
        let noon = TimeStamp {
            hour: 12,
            ..midnight
        };
        assert!((noon.julian_day().unwrap() - midnight.julian_day().unwrap() - 0.5).abs() < 1e-9);
    }
    #[test]
    fn julian_day_fractional_second() {
        let whole = TimeStamp {
            day: 1,
            month: 1,
            year: 2020,
            ..Default::default()
        };
        let fractional = TimeStamp {
            frac_second: 0.5,
            ..whole
        };
        let delta = fractional.julian_day().unwrap() - whole.julian_day().unwrap();
        assert!((delta - 0.5 / 86_400.0).abs() < 1e-12);
    }
    #[test]
    fn julian_day_invalid_date() {
        let invalid = TimeStamp {
            day: 31,
            month: 2,
            year: 2024,
            ..Default::default()
        };
        assert_eq!(invalid.julian_day(), None);
    }
    #[test]
    fn comment_header() {
        let mut header = vec![0u8; HEADER_LEN];
        header[0] = COMMENT_SENTINEL;
        header[1..6].copy_from_slice(b"hello");
        assert_eq!(file_comment(&header).as_deref(), Some("hello"));
    }
    #[test]
    fn headerless_file() {
        assert_eq!(file_comment(&[0u8; HEADER_LEN]), None);
    }
}
