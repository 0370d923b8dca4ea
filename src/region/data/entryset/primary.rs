use bitfield::bitfield;
#[cfg(all(feature = "chrono", feature = "std"))]
use chrono::Local;
#[cfg(feature = "chrono")]
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use derive_more::Into;

use super::super::entry_type::{EntryType, RawEntryType};
use crate::endian::Little as LE;
use crate::region::Plain;

bitfield! {
    /// FAT date in the upper half, FAT time in the lower half
    #[derive(Copy, Clone, Debug, Default, Into, PartialEq, Eq)]
    pub struct Timestamp(u32);
    year_offset, set_year_offset: 31, 25;
    pub month, set_month: 24, 21;
    pub day, set_day: 20, 16;
    pub hour, set_hour: 15, 11;
    pub minute, set_minute: 10, 5;
    pub double_second, set_double_second: 4, 0;
}

impl Timestamp {
    /// 1980-01-01 00:00:00
    pub const EPOCH: Self = Self(0x0021_0000);

    pub fn new(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Self {
        let mut timestamp = Self::default();
        timestamp.set_year(year);
        timestamp.set_month(month);
        timestamp.set_day(day);
        timestamp.set_hour(hour);
        timestamp.set_minute(minute);
        timestamp.set_second(second);
        timestamp
    }

    pub(crate) fn from_fat(date: u16, time: u16) -> Self {
        Self((date as u32) << 16 | time as u32)
    }

    pub(crate) fn fat_date(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub(crate) fn fat_time(&self) -> u16 {
        self.0 as u16
    }

    pub fn year(&self) -> u32 {
        self.year_offset() + 1980
    }

    pub fn set_year(&mut self, year: u32) {
        self.set_year_offset(year.saturating_sub(1980))
    }

    pub fn second(&self) -> u32 {
        self.double_second() * 2
    }

    pub fn set_second(&mut self, second: u32) {
        self.set_double_second(second / 2)
    }
}

#[cfg(feature = "chrono")]
impl From<Timestamp> for NaiveDateTime {
    fn from(timestamp: Timestamp) -> NaiveDateTime {
        let (year, month, day) = (timestamp.year() as i32, timestamp.month(), timestamp.day());
        let date = NaiveDate::from_ymd_opt(year, month, day);
        let (hour, minute, second) = (timestamp.hour(), timestamp.minute(), timestamp.second());
        let time = NaiveTime::from_hms_opt(hour, minute, second);
        NaiveDateTime::new(date.unwrap_or_default(), time.unwrap_or_default())
    }
}

#[cfg(feature = "chrono")]
impl From<NaiveDateTime> for Timestamp {
    fn from(datetime: NaiveDateTime) -> Self {
        let (date, time) = (datetime.date(), datetime.time());
        let (year, month, day) = (date.year() as u32, date.month(), date.day());
        Self::new(year, month, day, time.hour(), time.minute(), time.second())
    }
}

bitfield! {
    #[derive(Copy, Clone, Default, Debug, Into, PartialEq, Eq)]
    pub struct FileAttributes(u16);
    pub read_only, set_read_only: 0;
    pub hidden, set_hidden: 1;
    pub system, set_system: 2;
    /// FAT only
    pub volume_label, _: 3;
    pub directory, set_directory: 4;
    pub archive, set_archive: 5;
}

impl FileAttributes {
    pub fn new(directory: bool) -> Self {
        let mut attributes = Self::default();
        match directory {
            true => attributes.set_directory(true),
            false => attributes.set_archive(true),
        }
        attributes
    }
}

impl From<u8> for FileAttributes {
    fn from(byte: u8) -> Self {
        Self(byte as u16)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UTCOffset(u8);

impl UTCOffset {
    pub fn new(minutes: i16) -> Self {
        Self(((minutes / 15) as u8 & 0x7F) | 0x80)
    }

    pub fn minutes(&self) -> i16 {
        match self.0 & 0x80 > 0 {
            true => (((self.0 & 0x7F) << 1) as i8 >> 1) as i16 * 15,
            false => 0,
        }
    }
}

#[cfg(feature = "chrono")]
impl TryFrom<UTCOffset> for FixedOffset {
    type Error = ();
    fn try_from(offset: UTCOffset) -> Result<Self, ()> {
        FixedOffset::east_opt(offset.minutes() as i32 * 60).ok_or(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DateTime {
    pub timestamp: Timestamp,
    pub millisecond: u16,
    pub utc_offset: UTCOffset,
}

impl Default for DateTime {
    fn default() -> Self {
        Self { timestamp: Timestamp::EPOCH, millisecond: 0, utc_offset: UTCOffset::default() }
    }
}

#[cfg(feature = "extern-datetime-now")]
unsafe extern "Rust" {
    /// Provided by firmware with a real time clock
    pub(crate) fn sdfs_datetime_now() -> DateTime;
}

impl DateTime {
    pub fn now() -> Self {
        match () {
            #[cfg(feature = "extern-datetime-now")]
            () => unsafe { sdfs_datetime_now() },
            #[cfg(all(not(feature = "extern-datetime-now"), feature = "chrono", feature = "std"))]
            () => Local::now().into(),
            #[cfg(all(
                not(feature = "extern-datetime-now"),
                not(all(feature = "chrono", feature = "std"))
            ))]
            () => Self::default(),
        }
    }
}

#[cfg(all(feature = "chrono", feature = "std"))]
impl DateTime {
    /// None if the stored date is invalid
    pub fn localtime(&self) -> Option<chrono::DateTime<Local>> {
        use chrono::TimeZone;
        let timestamp = self.timestamp;
        let (year, month, day) = (timestamp.year() as i32, timestamp.month(), timestamp.day());
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let (hour, minute, second) = (timestamp.hour(), timestamp.minute(), timestamp.second());
        let time = NaiveTime::from_hms_milli_opt(hour, minute, second, self.millisecond as u32)?;
        let offset: FixedOffset = self.utc_offset.try_into().ok()?;
        let datetime = offset.from_local_datetime(&NaiveDateTime::new(date, time)).single()?;
        Some(datetime.with_timezone(&Local))
    }
}

#[cfg(feature = "chrono")]
impl<TZ: chrono::TimeZone> From<chrono::DateTime<TZ>> for DateTime {
    fn from(datetime: chrono::DateTime<TZ>) -> Self {
        use chrono::Offset;
        let seconds = datetime.offset().fix().local_minus_utc();
        let naive = datetime.naive_local();
        let millisecond = (naive.and_utc().timestamp_subsec_millis() % 1000) as u16;
        let utc_offset = UTCOffset::new((seconds / 60) as i16);
        Self { timestamp: naive.into(), millisecond, utc_offset }
    }
}

/// exFAT file directory entry, leading entry of a set
#[derive(Copy, Clone, Default, Debug)]
#[repr(C, packed(1))]
pub(crate) struct FileDirectory {
    pub(crate) entry_type: RawEntryType,
    pub(crate) secondary_count: u8,
    pub(crate) set_checksum: LE<u16>,
    file_attributes: LE<u16>,
    _reserved1: [u8; 2],
    create_timestamp: LE<u32>,
    last_modified_timestamp: LE<u32>,
    last_accessed_timestamp: LE<u32>,
    create_10ms_increment: u8,
    last_modified_10ms_increment: u8,
    create_utc_offset: UTCOffset,
    last_modified_utc_offset: UTCOffset,
    last_accessed_utc_offset: UTCOffset,
    _reserved2: [u8; 7],
}

unsafe impl Plain for FileDirectory {}

impl FileDirectory {
    pub(crate) fn new(secondary_count: u8, attributes: FileAttributes, now: DateTime) -> Self {
        let mut entry = FileDirectory {
            entry_type: RawEntryType::new(EntryType::FileDirectory, true),
            secondary_count,
            file_attributes: u16::from(attributes).into(),
            ..Default::default()
        };
        entry.create_timestamp = u32::from(now.timestamp).into();
        entry.create_10ms_increment = (now.millisecond / 10) as u8;
        entry.create_utc_offset = now.utc_offset;
        entry.set_last_modified(now);
        entry.set_last_accessed(now);
        entry
    }

    pub fn file_attributes(&self) -> FileAttributes {
        FileAttributes(self.file_attributes.to_ne())
    }

    pub fn create_timestamp(&self) -> DateTime {
        DateTime {
            timestamp: Timestamp(self.create_timestamp.to_ne()),
            millisecond: self.create_10ms_increment as u16 * 10,
            utc_offset: self.create_utc_offset,
        }
    }

    pub fn last_modified_timestamp(&self) -> DateTime {
        DateTime {
            timestamp: Timestamp(self.last_modified_timestamp.to_ne()),
            millisecond: self.last_modified_10ms_increment as u16 * 10,
            utc_offset: self.last_modified_utc_offset,
        }
    }

    pub fn last_accessed_timestamp(&self) -> DateTime {
        DateTime {
            timestamp: Timestamp(self.last_accessed_timestamp.to_ne()),
            millisecond: 0,
            utc_offset: self.last_accessed_utc_offset,
        }
    }

    pub(crate) fn set_last_modified(&mut self, datetime: DateTime) {
        self.last_modified_timestamp = u32::from(datetime.timestamp).into();
        self.last_modified_10ms_increment = (datetime.millisecond / 10) as u8;
        self.last_modified_utc_offset = datetime.utc_offset;
    }

    pub(crate) fn set_last_accessed(&mut self, datetime: DateTime) {
        self.last_accessed_timestamp = u32::from(datetime.timestamp).into();
        self.last_accessed_utc_offset = datetime.utc_offset;
    }
}

/// Entry set checksum and name hash share the same rotation
#[derive(Default)]
pub(crate) struct Checksum(u16);

impl Checksum {
    pub(crate) fn write(&mut self, byte: u8) {
        self.0 = ((self.0 & 1) << 15).wrapping_add(self.0 >> 1).wrapping_add(byte as u16)
    }

    pub(crate) fn sum(&self) -> u16 {
        self.0
    }
}

/// Hash over an already up-cased UTF-16 name
pub(crate) fn name_hash(units: &[u16]) -> u16 {
    let mut checksum = Checksum::default();
    for &unit in units {
        checksum.write(unit as u8);
        checksum.write((unit >> 8) as u8);
    }
    checksum.sum()
}
