#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use sdfs::geometry::FatType;
use sdfs::io::mem::{MemError, MemIO};
use sdfs::io::BlockDevice;
use sdfs::types::SectorID;
use sdfs::{Directory, File, FileOrDirectory, Volume};

pub const SECTOR_SIZE: usize = 512;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn mount<D: BlockDevice>(io: D) -> Volume<D> {
    init();
    let mut volume = Volume::new(io);
    volume.mount().unwrap();
    volume
}

pub fn unmount<D: BlockDevice>(volume: Volume<D>) -> D {
    match volume.try_free() {
        Ok(io) => io,
        Err(_) => panic!("volume still in use"),
    }
}

pub fn open_file<D: BlockDevice>(volume: &mut Volume<D>, path: &str) -> File<D> {
    match volume.open(path).unwrap() {
        FileOrDirectory::File(file) => file,
        FileOrDirectory::Directory(_) => panic!("{} is a directory", path),
    }
}

pub fn open_directory<D: BlockDevice>(volume: &mut Volume<D>, path: &str) -> Directory<D> {
    match volume.open(path).unwrap() {
        FileOrDirectory::Directory(directory) => directory,
        FileOrDirectory::File(_) => panic!("{} is a file", path),
    }
}

pub fn read_all<D: BlockDevice>(file: &mut File<D>) -> Vec<u8> {
    let mut data = vec![0u8; file.size() as usize];
    file.read_exact(&mut data).unwrap();
    data
}

/// Deterministic content that differs between clusters
pub fn pattern(length: usize, seed: u8) -> Vec<u8> {
    (0..length).map(|i| ((i * 7 + i / 4096) as u8).wrapping_add(seed)).collect()
}

fn put_u16(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Raw FAT entry of `cluster` in a FAT starting at byte `start`
pub fn fat_entry(image: &[u8], start: usize, fat_type: FatType, cluster: u32) -> u32 {
    let cluster = cluster as usize;
    match fat_type {
        FatType::Fat12 => {
            let offset = start + cluster + cluster / 2;
            let value = u16::from_le_bytes([image[offset], image[offset + 1]]);
            match cluster & 1 {
                1 => (value >> 4) as u32,
                _ => (value & 0xFFF) as u32,
            }
        }
        FatType::Fat16 => {
            let offset = start + cluster * 2;
            u16::from_le_bytes([image[offset], image[offset + 1]]) as u32
        }
        FatType::Fat32 | FatType::ExFat => {
            let offset = start + cluster * 4;
            u32::from_le_bytes(image[offset..offset + 4].try_into().unwrap())
        }
    }
}

pub fn set_fat_entry(image: &mut [u8], start: usize, fat_type: FatType, cluster: u32, value: u32) {
    let index = cluster as usize;
    match fat_type {
        FatType::Fat12 => {
            let offset = start + index + index / 2;
            let value = (value & 0xFFF) as u16;
            if index & 1 == 1 {
                image[offset] = (image[offset] & 0x0F) | (value << 4) as u8;
                image[offset + 1] = (value >> 4) as u8;
            } else {
                image[offset] = value as u8;
                image[offset + 1] = (image[offset + 1] & 0xF0) | (value >> 8) as u8;
            }
        }
        FatType::Fat16 => put_u16(image, start + index * 2, value as u16),
        FatType::Fat32 | FatType::ExFat => put_u32(image, start + index * 4, value),
    }
}

/// FAT12/16/32 volume laid down on a RAM disk, optionally behind an MBR
#[derive(Copy, Clone, Debug)]
pub struct FatImage {
    pub fat_type: FatType,
    pub device_sectors: u64,
    /// Volume start, non zero puts an MBR on sector 0
    pub offset: u32,
    pub total_sectors: u32,
    pub sectors_per_cluster: u8,
    pub reserved: u16,
    pub fat_count: u8,
    pub fat_length: u32,
    pub root_entries: u16,
    pub serial_number: u32,
    pub label: [u8; 11],
}

impl FatImage {
    /// 64 MiB device, 4 KiB clusters, 16001 clusters with one taken by root directory
    pub fn fat32_64mib() -> Self {
        Self {
            fat_type: FatType::Fat32,
            device_sectors: 64 * 1024 * 1024 / SECTOR_SIZE as u64,
            offset: 0,
            total_sectors: 32 + 2 * 126 + 16001 * 8,
            sectors_per_cluster: 8,
            reserved: 32,
            fat_count: 2,
            fat_length: 126,
            root_entries: 0,
            serial_number: 0x1234_5678,
            label: *b"SDCARD     ",
        }
    }

    /// FAT32 with `clusters` clusters of one sector
    pub fn fat32_small(clusters: u32) -> Self {
        let fat_length = (clusters + 2 + 127) / 128;
        Self {
            fat_type: FatType::Fat32,
            device_sectors: (32 + 2 * fat_length + clusters) as u64,
            offset: 0,
            total_sectors: 32 + 2 * fat_length + clusters,
            sectors_per_cluster: 1,
            reserved: 32,
            fat_count: 2,
            fat_length,
            root_entries: 0,
            serial_number: 0xCAFE_0001,
            label: *b"NO NAME    ",
        }
    }

    pub fn fat16() -> Self {
        Self {
            fat_type: FatType::Fat16,
            device_sectors: 40000,
            offset: 0,
            total_sectors: 40000,
            sectors_per_cluster: 4,
            reserved: 1,
            fat_count: 2,
            fat_length: 40,
            root_entries: 512,
            serial_number: 0x0016_0016,
            label: *b"FAT16VOL   ",
        }
    }

    pub fn fat12() -> Self {
        Self {
            fat_type: FatType::Fat12,
            device_sectors: 4000,
            offset: 0,
            total_sectors: 4000,
            sectors_per_cluster: 1,
            reserved: 1,
            fat_count: 2,
            fat_length: 12,
            root_entries: 224,
            serial_number: 0x0012_0012,
            label: *b"FLOPPY     ",
        }
    }

    /// Same volume placed in MBR partition 1 at sector `offset`
    pub fn partitioned(mut self, offset: u32) -> Self {
        self.offset = offset;
        self.device_sectors += offset as u64;
        self
    }

    pub fn root_sectors(&self) -> u32 {
        (self.root_entries as u32 * 32 + SECTOR_SIZE as u32 - 1) / SECTOR_SIZE as u32
    }

    pub fn data_start(&self) -> u32 {
        self.reserved as u32 + self.fat_count as u32 * self.fat_length + self.root_sectors()
    }

    pub fn cluster_count(&self) -> u32 {
        (self.total_sectors - self.data_start()) / self.sectors_per_cluster as u32
    }

    /// Byte offset of FAT copy `copy` on the device
    pub fn fat_start(&self, copy: u8) -> usize {
        let sector = self.offset + self.reserved as u32 + copy as u32 * self.fat_length;
        sector as usize * SECTOR_SIZE
    }

    /// Byte offset of cluster on the device
    pub fn cluster_start(&self, cluster: u32) -> usize {
        let sector =
            self.offset + self.data_start() + (cluster - 2) * self.sectors_per_cluster as u32;
        sector as usize * SECTOR_SIZE
    }

    pub fn build(&self) -> MemIO {
        let mut io = MemIO::new(self.device_sectors, 9);
        let image = io.as_bytes_mut();
        if self.offset > 0 {
            let mbr = &mut image[..SECTOR_SIZE];
            let entry = 446;
            mbr[entry + 4] = match self.fat_type {
                FatType::Fat32 => 0x0C,
                _ => 0x06,
            };
            put_u32(mbr, entry + 8, self.offset);
            put_u32(mbr, entry + 12, self.total_sectors);
            mbr[510] = 0x55;
            mbr[511] = 0xAA;
        }
        let volume = self.offset as usize * SECTOR_SIZE;
        let boot = &mut image[volume..volume + SECTOR_SIZE];
        boot[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        boot[3..11].copy_from_slice(b"MSWIN4.1");
        put_u16(boot, 11, SECTOR_SIZE as u16);
        boot[13] = self.sectors_per_cluster;
        put_u16(boot, 14, self.reserved);
        boot[16] = self.fat_count;
        put_u16(boot, 17, self.root_entries);
        boot[21] = 0xF8;
        if self.fat_type != FatType::Fat32 && self.total_sectors < 0x10000 {
            put_u16(boot, 19, self.total_sectors as u16);
        } else {
            put_u32(boot, 32, self.total_sectors);
        }
        match self.fat_type {
            FatType::Fat32 => {
                put_u32(boot, 36, self.fat_length);
                put_u32(boot, 44, 2);
                put_u16(boot, 48, 1);
                put_u16(boot, 50, 6);
                boot[64] = 0x80;
                boot[66] = 0x29;
                put_u32(boot, 67, self.serial_number);
                boot[71..82].copy_from_slice(&self.label);
                boot[82..90].copy_from_slice(b"FAT32   ");
            }
            _ => {
                put_u16(boot, 22, self.fat_length as u16);
                boot[36] = 0x80;
                boot[38] = 0x29;
                put_u32(boot, 39, self.serial_number);
                boot[43..54].copy_from_slice(&self.label);
                let name = if self.fat_type == FatType::Fat12 { b"FAT12   " } else { b"FAT16   " };
                boot[54..62].copy_from_slice(name);
            }
        }
        boot[510] = 0x55;
        boot[511] = 0xAA;

        if self.fat_type == FatType::Fat32 {
            let info = &mut image[volume + SECTOR_SIZE..volume + 2 * SECTOR_SIZE];
            put_u32(info, 0, 0x41615252);
            put_u32(info, 484, 0x61417272);
            put_u32(info, 488, self.cluster_count() - 1);
            put_u32(info, 492, 3);
            put_u32(info, 508, 0xAA550000);
        }
        let (media, last) = match self.fat_type {
            FatType::Fat12 => (0xFF8, 0xFFF),
            FatType::Fat16 => (0xFFF8, 0xFFFF),
            _ => (0x0FFFFFF8, 0x0FFFFFFF),
        };
        for copy in 0..self.fat_count {
            let start = self.fat_start(copy);
            set_fat_entry(image, start, self.fat_type, 0, media);
            set_fat_entry(image, start, self.fat_type, 1, last);
            if self.fat_type == FatType::Fat32 {
                set_fat_entry(image, start, self.fat_type, 2, last);
            }
        }
        io
    }
}

/// Upcase table of the first 128 code units, stored uncompressed
pub fn upcase_table() -> Vec<u8> {
    (0u8..128).flat_map(|unit| (unit.to_ascii_uppercase() as u16).to_le_bytes()).collect()
}

fn checksum32(sum: u32, byte: u8) -> u32 {
    sum.rotate_right(1).wrapping_add(byte as u32)
}

/// exFAT volume with bitmap on cluster 2, upcase table on cluster 3 and root directory on cluster 4
#[derive(Copy, Clone, Debug)]
pub struct ExFatImage {
    pub volume_sectors: u64,
    pub fat_offset: u32,
    pub fat_length: u32,
    pub heap_offset: u32,
    pub sectors_per_cluster_shift: u8,
    pub serial_number: u32,
}

impl Default for ExFatImage {
    /// 8 MiB, 4 KiB clusters
    fn default() -> Self {
        Self {
            volume_sectors: 16384,
            fat_offset: 24,
            fat_length: 16,
            heap_offset: 64,
            sectors_per_cluster_shift: 3,
            serial_number: 0xE0E0_0001,
        }
    }
}

impl ExFatImage {
    pub const BITMAP_CLUSTER: u32 = 2;
    pub const UPCASE_CLUSTER: u32 = 3;
    pub const ROOT_CLUSTER: u32 = 4;

    pub fn cluster_count(&self) -> u32 {
        ((self.volume_sectors - self.heap_offset as u64) >> self.sectors_per_cluster_shift) as u32
    }

    pub fn cluster_size(&self) -> usize {
        SECTOR_SIZE << self.sectors_per_cluster_shift
    }

    pub fn fat_start(&self) -> usize {
        self.fat_offset as usize * SECTOR_SIZE
    }

    pub fn cluster_start(&self, cluster: u32) -> usize {
        let sector =
            self.heap_offset as usize + ((cluster as usize - 2) << self.sectors_per_cluster_shift);
        sector * SECTOR_SIZE
    }

    pub fn bit_is_set(&self, image: &[u8], cluster: u32) -> bool {
        let bit = (cluster - 2) as usize;
        image[self.cluster_start(Self::BITMAP_CLUSTER) + bit / 8] & (1 << (bit % 8)) != 0
    }

    /// Recomputes boot region checksum into sector 11
    pub fn seal(image: &mut [u8]) {
        let mut sum = 0u32;
        for (i, &byte) in image[..11 * SECTOR_SIZE].iter().enumerate() {
            if i == 106 || i == 107 || i == 112 {
                continue;
            }
            sum = checksum32(sum, byte);
        }
        let sector = &mut image[11 * SECTOR_SIZE..12 * SECTOR_SIZE];
        for chunk in sector.chunks_exact_mut(4) {
            chunk.copy_from_slice(&sum.to_le_bytes());
        }
    }

    pub fn build(&self) -> MemIO {
        let mut io = MemIO::new(self.volume_sectors, 9);
        let image = io.as_bytes_mut();
        let cluster_count = self.cluster_count();
        {
            let boot = &mut image[..SECTOR_SIZE];
            boot[0..3].copy_from_slice(&[0xEB, 0x76, 0x90]);
            boot[3..11].copy_from_slice(b"EXFAT   ");
            put_u64(boot, 72, self.volume_sectors);
            put_u32(boot, 80, self.fat_offset);
            put_u32(boot, 84, self.fat_length);
            put_u32(boot, 88, self.heap_offset);
            put_u32(boot, 92, cluster_count);
            put_u32(boot, 96, Self::ROOT_CLUSTER);
            put_u32(boot, 100, self.serial_number);
            put_u16(boot, 104, 0x0100);
            boot[108] = 9;
            boot[109] = self.sectors_per_cluster_shift;
            boot[110] = 1;
            boot[111] = 0x80;
            boot[510] = 0x55;
            boot[511] = 0xAA;
        }
        for i in 1..9 {
            let sector = &mut image[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            sector[510] = 0x55;
            sector[511] = 0xAA;
        }
        Self::seal(image);

        let fat = self.fat_start();
        set_fat_entry(image, fat, FatType::ExFat, 0, 0xFFFFFFF8);
        set_fat_entry(image, fat, FatType::ExFat, 1, 0xFFFFFFFF);
        for cluster in [Self::BITMAP_CLUSTER, Self::UPCASE_CLUSTER, Self::ROOT_CLUSTER] {
            set_fat_entry(image, fat, FatType::ExFat, cluster, 0xFFFFFFFF);
        }

        let bitmap = self.cluster_start(Self::BITMAP_CLUSTER);
        image[bitmap] = 0b111;

        let table = upcase_table();
        let upcase = self.cluster_start(Self::UPCASE_CLUSTER);
        image[upcase..upcase + table.len()].copy_from_slice(&table);
        let table_checksum = table.iter().fold(0u32, |sum, &byte| checksum32(sum, byte));

        let root = self.cluster_start(Self::ROOT_CLUSTER);
        let label = &mut image[root..root + 32];
        label[0] = 0x83;
        label[1] = 4;
        for (i, unit) in "EXSD".encode_utf16().enumerate() {
            put_u16(label, 2 + i * 2, unit);
        }
        let entry = &mut image[root + 32..root + 64];
        entry[0] = 0x81;
        put_u32(entry, 20, Self::BITMAP_CLUSTER);
        put_u64(entry, 24, ((cluster_count + 7) / 8) as u64);
        let entry = &mut image[root + 64..root + 96];
        entry[0] = 0x82;
        put_u32(entry, 4, table_checksum);
        put_u32(entry, 20, Self::UPCASE_CLUSTER);
        put_u64(entry, 24, table.len() as u64);
        io
    }
}

/// RAM disk whose writes can be made to fail from outside the volume
pub struct FaultyIO {
    pub io: MemIO,
    pub fail_writes: Rc<Cell<bool>>,
    pub writes: Rc<Cell<usize>>,
}

impl FaultyIO {
    pub fn new(io: MemIO) -> Self {
        Self { io, fail_writes: Rc::new(Cell::new(false)), writes: Rc::new(Cell::new(0)) }
    }
}

impl BlockDevice for FaultyIO {
    type Error = MemError;

    fn num_sectors(&self) -> u64 {
        self.io.num_sectors()
    }

    fn read(&mut self, id: SectorID, buf: &mut [u8]) -> Result<(), MemError> {
        self.io.read(id, buf)
    }

    fn write(&mut self, id: SectorID, data: &[u8]) -> Result<(), MemError> {
        if self.fail_writes.get() {
            return Err(MemError::OutOfRange(id));
        }
        self.writes.set(self.writes.get() + 1);
        self.io.write(id, data)
    }
}
