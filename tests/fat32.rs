mod common;

use common::{FatImage, FaultyIO};
use sdfs::error::{DataError, Error, FormatError, InputError, OperationError};
use sdfs::geometry::FatType;
use sdfs::types::{ClusterID, SectorID};
use sdfs::{MountState, SeekFrom, Volume};

const CLUSTER: usize = 4096;

#[test]
fn test_mount() {
    let image = FatImage::fat32_64mib();
    let volume = common::mount(image.build());
    assert_eq!(volume.state(), MountState::Mounted);
    assert_eq!(volume.fat_type().unwrap(), FatType::Fat32);
    assert_eq!(volume.cluster_count().unwrap(), 16001);
    assert_eq!(volume.free_cluster_count().unwrap(), 16000);
    assert_eq!(volume.fat_count().unwrap(), 2);
    assert_eq!(volume.fat_length().unwrap(), 126);
    assert_eq!(volume.fat_start_sector().unwrap(), SectorID::from(32u64));
    assert_eq!(volume.serial_number().unwrap(), 0x1234_5678);
    assert_eq!(volume.label().unwrap().as_str(), "SDCARD");
    assert_eq!(volume.geometry().unwrap().cluster_size(), 4096);
}

#[test]
fn test_preallocate_write_remount() {
    let image = FatImage::fat32_64mib();
    let mut io = image.build();
    let head = vec![0xA5u8; CLUSTER];
    let body = common::pattern(4 * CLUSTER, 3);
    let tail = vec![0x5Au8; CLUSTER];
    let first = {
        let mut volume = common::mount(&mut io);
        let mut file = volume.create("/DATA.BIN").unwrap();
        file.preallocate(10 * CLUSTER as u64).unwrap();
        assert_eq!(volume.free_cluster_count().unwrap(), 15990);

        let first = file.entry().first_cluster();
        let mut cluster = first;
        let mut length = 1;
        while let Some(next) = volume.chain_next(cluster).unwrap() {
            assert_eq!(next, cluster + 1u32);
            cluster = next;
            length += 1;
        }
        assert_eq!(length, 10);

        file.write_all(&head).unwrap();
        file.write_all(&body).unwrap();
        file.write_all(&tail).unwrap();
        assert_eq!(file.size(), 6 * CLUSTER as u64);
        file.close().unwrap();
        assert_eq!(volume.free_cluster_count().unwrap(), 15990);
        common::unmount(volume);
        first
    };

    let start = image.cluster_start(u32::from(first) + 1);
    assert_eq!(&io.as_bytes()[start..start + body.len()], &body[..]);

    let mut volume = common::mount(&mut io);
    assert_eq!(volume.free_cluster_count().unwrap(), 15990);
    let mut file = common::open_file(&mut volume, "/data.bin");
    assert_eq!(file.size(), 6 * CLUSTER as u64);
    file.seek(SeekFrom::Start(CLUSTER as u64)).unwrap();
    let mut buf = vec![0u8; body.len()];
    file.read_exact(&mut buf).unwrap();
    assert_eq!(buf, body);
    let mut buf = vec![0u8; CLUSTER];
    file.read_exact(&mut buf).unwrap();
    assert_eq!(buf, tail);
    assert!(matches!(file.read_exact(&mut buf[..1]), Err(Error::EOF)));
    assert_eq!(file.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_disk_full() {
    let image = FatImage::fat32_small(100);
    let mut volume = common::mount(image.build());
    assert_eq!(volume.free_cluster_count().unwrap(), 99);
    let mut prev = None;
    let mut count = 0;
    loop {
        match volume.allocate_cluster(prev) {
            Ok(cluster) => {
                prev = Some(cluster);
                count += 1;
            }
            Err(Error::DiskFull) => break,
            Err(error) => panic!("unexpected error {:?}", error),
        }
    }
    assert_eq!(count, 99);
    assert_eq!(volume.free_cluster_count().unwrap(), 0);
    assert!(matches!(volume.allocate_cluster(None), Err(Error::DiskFull)));
}

#[test]
fn test_write_until_full() {
    let image = FatImage::fat32_small(20);
    let mut volume = common::mount(image.build());
    let mut file = volume.create("/FILL").unwrap();
    let chunk = vec![0x11u8; 512];
    for _ in 0..19 {
        file.write_all(&chunk).unwrap();
    }
    assert!(matches!(file.write(&chunk), Err(Error::DiskFull)));
    assert_eq!(file.size(), 19 * 512);
    assert_eq!(volume.free_cluster_count().unwrap(), 0);
    file.close().unwrap();
    volume.remove("/FILL").unwrap();
    assert_eq!(volume.free_cluster_count().unwrap(), 19);
}

#[test]
fn test_mirrored_fat() {
    let image = FatImage::fat32_64mib();
    let mut io = image.build();
    let (first, last) = {
        let mut volume = common::mount(&mut io);
        let first = volume.allocate_cluster(None).unwrap();
        let mut last = first;
        for _ in 1..300 {
            last = volume.allocate_cluster(Some(last)).unwrap();
        }
        volume.sync().unwrap();
        common::unmount(volume);
        (u32::from(first), u32::from(last))
    };
    let bytes = io.as_bytes();
    let length = image.fat_length as usize * common::SECTOR_SIZE;
    let (primary, mirror) = (image.fat_start(0), image.fat_start(1));
    assert_eq!(&bytes[primary..primary + length], &bytes[mirror..mirror + length]);
    assert_eq!(last - first, 299);
    for cluster in first..last {
        assert_eq!(common::fat_entry(bytes, mirror, FatType::Fat32, cluster), cluster + 1);
    }
    assert_eq!(common::fat_entry(bytes, mirror, FatType::Fat32, last), 0x0FFF_FFFF);
}

#[test]
fn test_free_chain_idempotent() {
    let image = FatImage::fat32_64mib();
    let mut volume = common::mount(image.build());
    let before = volume.free_cluster_count().unwrap();
    let first = volume.allocate_cluster(None).unwrap();
    let mut prev = first;
    for _ in 1..7 {
        prev = volume.allocate_cluster(Some(prev)).unwrap();
    }
    assert_eq!(volume.free_cluster_count().unwrap(), before - 7);

    let mut visited = vec![first];
    let mut cluster = first;
    while let Some(next) = volume.chain_next(cluster).unwrap() {
        assert!(!visited.contains(&next));
        visited.push(next);
        cluster = next;
    }
    assert_eq!(visited.len(), 7);

    assert_eq!(volume.free_chain(first).unwrap(), 7);
    assert_eq!(volume.free_cluster_count().unwrap(), before);
    assert_eq!(volume.free_chain(first).unwrap(), 0);
    assert_eq!(volume.free_cluster_count().unwrap(), before);
}

#[test]
fn test_allocation_cursor() {
    let image = FatImage::fat32_64mib();
    let mut volume = common::mount(image.build());
    let a = volume.allocate_cluster(None).unwrap();
    let b = volume.allocate_cluster(None).unwrap();
    assert_eq!(b, a + 1u32);
    let c = volume.allocate_cluster(Some(a)).unwrap();
    assert_eq!(c, b + 1u32);
    assert_eq!(volume.chain_next(a).unwrap(), Some(c));
    assert_eq!(volume.chain_next(c).unwrap(), None);
    assert!(matches!(
        volume.chain_next(ClusterID::from(20000)),
        Err(Error::Corruption(DataError::ClusterRange(_)))
    ));
}

#[test]
fn test_allocate_after_invalid_cluster() {
    let image = FatImage::fat32_64mib();
    let mut io = image.build();
    let data = vec![0xABu8; 4 * CLUSTER];
    let reserved = common::fat_entry(io.as_bytes(), image.fat_start(0), FatType::Fat32, 1);
    {
        let mut volume = common::mount(&mut io);
        let mut file = volume.create("/DATA.BIN").unwrap();
        file.write_all(&data).unwrap();
        file.close().unwrap();
        for prev in [0u32, 1, 16003, 20000] {
            assert!(matches!(
                volume.allocate_cluster(Some(ClusterID::from(prev))),
                Err(Error::Corruption(DataError::ClusterRange(cluster)))
                    if u32::from(cluster) == prev
            ));
        }
        assert_eq!(volume.free_cluster_count().unwrap(), 16000 - 4);
        common::unmount(volume);
    }
    let bytes = io.as_bytes();
    for copy in 0..2 {
        assert_eq!(common::fat_entry(bytes, image.fat_start(copy), FatType::Fat32, 1), reserved);
    }
    let mut volume = common::mount(&mut io);
    let mut file = common::open_file(&mut volume, "/DATA.BIN");
    assert_eq!(common::read_all(&mut file), data);
}

#[test]
fn test_cyclic_root() {
    let image = FatImage::fat32_small(100);
    let mut io = image.build();
    {
        let bytes = io.as_bytes_mut();
        for copy in 0..2 {
            common::set_fat_entry(bytes, image.fat_start(copy), FatType::Fat32, 2, 2);
        }
        let root = image.cluster_start(2);
        for slot in 0..common::SECTOR_SIZE / 32 {
            bytes[root + slot * 32] = 0xE5;
        }
    }
    common::init();
    let mut volume = Volume::new(io);
    assert!(matches!(volume.mount(), Err(Error::Corruption(DataError::ChainCycle))));
    assert_eq!(volume.state(), MountState::Error);
    assert!(matches!(volume.mount(), Err(Error::NotMounted)));
    assert!(volume.try_free().is_ok());
}

#[test]
fn test_cyclic_directory() {
    let image = FatImage::fat32_small(100);
    let mut io = image.build();
    let cluster = {
        let mut volume = common::mount(&mut io);
        let entry = volume.mkdir("/LOOP").unwrap();
        common::unmount(volume);
        u32::from(entry.first_cluster())
    };
    {
        let bytes = io.as_bytes_mut();
        for copy in 0..2 {
            common::set_fat_entry(bytes, image.fat_start(copy), FatType::Fat32, cluster, cluster);
        }
        let start = image.cluster_start(cluster);
        for slot in 0..common::SECTOR_SIZE / 32 {
            bytes[start + slot * 32] = 0xE5;
        }
    }
    let mut volume = common::mount(&mut io);
    let mut directory = common::open_directory(&mut volume, "/LOOP");
    assert!(matches!(directory.entries(), Err(Error::Corruption(DataError::ChainCycle))));
    assert!(matches!(directory.find("ANY.TXT"), Err(Error::Corruption(DataError::ChainCycle))));
}

#[test]
fn test_write_failure_retry() {
    let image = FatImage::fat32_small(100);
    let faulty = FaultyIO::new(image.build());
    let fail_writes = faulty.fail_writes.clone();
    let mut volume = common::mount(faulty);
    let mut file = volume.create("/LOG.TXT").unwrap();
    file.write_all(b"hello world").unwrap();

    fail_writes.set(true);
    assert!(matches!(file.flush(), Err(Error::IO(_))));
    fail_writes.set(false);
    file.flush().unwrap();
    file.close().unwrap();

    let faulty = common::unmount(volume);
    let mut volume = common::mount(faulty.io);
    let mut file = common::open_file(&mut volume, "/LOG.TXT");
    assert_eq!(common::read_all(&mut file), b"hello world");
}

#[test]
fn test_fs_info_updated() {
    let image = FatImage::fat32_64mib();
    let mut io = image.build();
    {
        let mut volume = common::mount(&mut io);
        let mut file = volume.create("/A.BIN").unwrap();
        file.write_all(&vec![1u8; 3 * CLUSTER]).unwrap();
        file.close().unwrap();
        volume.sync().unwrap();
        common::unmount(volume);
    }
    let info = &io.as_bytes()[common::SECTOR_SIZE..2 * common::SECTOR_SIZE];
    let free = u32::from_le_bytes([info[488], info[489], info[490], info[491]]);
    assert_eq!(free, 15997);
    let next_free = u32::from_le_bytes([info[492], info[493], info[494], info[495]]);
    assert_eq!(next_free, 6);
}

#[test]
fn test_paths() {
    let image = FatImage::fat32_64mib();
    let mut volume = common::mount(image.build());
    volume.mkdir("/LOGS").unwrap();
    volume.mkdir("/LOGS/2024").unwrap();
    let mut file = volume.create("/LOGS/2024/boot.log").unwrap();
    assert_eq!(file.entry().name(), "boot.log");
    file.write_all(b"first line\n").unwrap();

    assert!(matches!(
        volume.open("/LOGS/2024/BOOT.LOG"),
        Err(Error::Operation(OperationError::AlreadyOpen))
    ));
    assert!(matches!(
        volume.remove("/LOGS/2024/BOOT.LOG"),
        Err(Error::Operation(OperationError::AlreadyOpen))
    ));
    file.close().unwrap();

    assert!(matches!(
        volume.create("/LOGS/2024/BOOT.LOG"),
        Err(Error::Operation(OperationError::AlreadyExists))
    ));
    assert!(matches!(
        volume.open("/LOGS/2025/BOOT.LOG"),
        Err(Error::Operation(OperationError::NotFound))
    ));
    assert!(matches!(
        volume.open("/LOGS/2024/BOOT.LOG/X"),
        Err(Error::Operation(OperationError::NotDirectory))
    ));
    assert!(matches!(
        volume.create("/LOGS/2024/BOOT.LOG/X"),
        Err(Error::Operation(OperationError::NotDirectory))
    ));
    assert!(matches!(volume.mkdir("/"), Err(Error::Input(InputError::Name))));
    assert!(matches!(volume.create("/LOGS/with space.txt"), Err(Error::Input(InputError::Name))));
    assert!(matches!(
        volume.create("/LOGS/LONGFILENAME.TXT"),
        Err(Error::Input(InputError::NameTooLong))
    ));

    let mut directory = common::open_directory(&mut volume, "/logs/2024");
    let names: Vec<String> =
        directory.entries().unwrap().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, vec!["boot.log".to_string()]);
    directory.close();

    assert!(matches!(
        volume.remove("/LOGS/2024"),
        Err(Error::Operation(OperationError::DirectoryNotEmpty))
    ));
    volume.remove("/LOGS/2024/boot.log").unwrap();
    volume.remove("/LOGS/2024").unwrap();
    volume.remove("/LOGS").unwrap();
    assert!(matches!(volume.open("/LOGS"), Err(Error::Operation(OperationError::NotFound))));
    assert_eq!(volume.free_cluster_count().unwrap(), 16000);
}

#[test]
fn test_root_directory() {
    let image = FatImage::fat32_64mib();
    let mut volume = common::mount(image.build());
    let mut root = volume.root_directory().unwrap();
    assert!(root.entry().is_root());
    let entry = root.create("README.TXT", false).unwrap();
    root.create("DOCS", true).unwrap();
    assert_eq!(root.entries().unwrap().len(), 2);
    let found = root.find("readme.txt").unwrap().unwrap();
    assert_eq!(found.first_cluster(), entry.first_cluster());
    assert!(root.find("MISSING").unwrap().is_none());
    let docs = root.find("DOCS").unwrap().unwrap();
    assert!(docs.is_directory());
    root.delete(&found).unwrap();
    root.delete(&docs).unwrap();
    assert!(root.entries().unwrap().is_empty());
    // Root directory handle can be held any number of times
    let _again = volume.root_directory().unwrap();
}

#[test]
fn test_directory_growth() {
    let image = FatImage::fat32_small(100);
    let mut io = image.build();
    {
        let mut volume = common::mount(&mut io);
        volume.mkdir("/MANY").unwrap();
        for i in 0..40 {
            volume.create(&format!("/MANY/F{}.TXT", i)).unwrap().close().unwrap();
        }
        common::unmount(volume);
    }
    let mut volume = common::mount(&mut io);
    let mut directory = common::open_directory(&mut volume, "/MANY");
    let entries = directory.entries().unwrap();
    assert_eq!(entries.len(), 40);
    assert!(entries.iter().any(|entry| entry.name() == "F39.TXT"));
}

#[test]
fn test_seek_truncate() {
    let image = FatImage::fat32_64mib();
    let mut volume = common::mount(image.build());
    let mut file = volume.create("/SEEK.BIN").unwrap();
    let data = common::pattern(3 * CLUSTER + 100, 9);
    file.write_all(&data).unwrap();
    let free = volume.free_cluster_count().unwrap();
    assert_eq!(free, 16000 - 4);

    assert_eq!(file.seek(SeekFrom::End(-100)).unwrap(), 3 * CLUSTER as u64);
    let mut buf = [0u8; 100];
    file.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[3 * CLUSTER..]);
    assert_eq!(file.seek(SeekFrom::Current(-150)).unwrap(), 3 * CLUSTER as u64 - 50);
    assert!(matches!(
        file.seek(SeekFrom::Current(1000)),
        Err(Error::Input(InputError::SeekPosition))
    ));
    assert!(matches!(
        file.seek(SeekFrom::End(-100_000)),
        Err(Error::Input(InputError::SeekPosition))
    ));

    file.seek(SeekFrom::Start(10)).unwrap();
    file.write_all(b"patched").unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut buf = [0u8; 20];
    file.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..10], &data[..10]);
    assert_eq!(&buf[10..17], b"patched");
    assert_eq!(&buf[17..], &data[17..20]);

    file.truncate(CLUSTER as u64 + 1).unwrap();
    assert_eq!(file.size(), CLUSTER as u64 + 1);
    assert_eq!(volume.free_cluster_count().unwrap(), 16000 - 2);
    assert!(matches!(file.truncate(CLUSTER as u64 * 2), Err(Error::Input(InputError::Size))));
    file.truncate(0).unwrap();
    assert!(!file.entry().first_cluster().valid());
    assert_eq!(volume.free_cluster_count().unwrap(), 16000);
    file.write_all(b"again").unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    assert_eq!(common::read_all(&mut file), b"again");
}

#[test]
fn test_wipe() {
    let image = FatImage::fat32_64mib();
    let mut volume = common::mount(image.build());
    volume.mkdir("/DIR").unwrap();
    let mut file = volume.create("/DIR/X.BIN").unwrap();
    file.write_all(&vec![7u8; 2 * CLUSTER]).unwrap();
    assert!(matches!(volume.wipe(), Err(Error::Operation(OperationError::AlreadyOpen))));
    file.close().unwrap();

    volume.wipe().unwrap();
    assert_eq!(volume.free_cluster_count().unwrap(), 16000);
    assert!(volume.root_directory().unwrap().entries().unwrap().is_empty());
    assert!(matches!(volume.open("/DIR"), Err(Error::Operation(OperationError::NotFound))));
    volume.create("/NEW.TXT").unwrap().close().unwrap();
}

#[test]
fn test_invalidate() {
    let image = FatImage::fat32_64mib();
    let mut volume = common::mount(image.build());
    volume.mkdir("/KEEP").unwrap();
    volume.allocate_cluster(None).unwrap();
    volume.invalidate().unwrap();
    assert_eq!(volume.free_cluster_count().unwrap(), 15999);
    assert!(volume.open("/KEEP").is_ok());
}

#[test]
fn test_partition_table() {
    let image = FatImage::fat32_64mib().partitioned(2048);
    let mut io = image.build();
    {
        let mut volume = common::mount(&mut io);
        assert_eq!(volume.fat_start_sector().unwrap(), SectorID::from(2048u64 + 32));
        let mut file = volume.create("/P.TXT").unwrap();
        file.write_all(b"partitioned").unwrap();
        file.close().unwrap();
        common::unmount(volume);
    }
    let start = image.cluster_start(3);
    assert_eq!(&io.as_bytes()[start..start + 11], b"partitioned");

    common::init();
    let mut volume = Volume::new(&mut io);
    volume.mount_partition(1).unwrap();
    assert_eq!(volume.label().unwrap().as_str(), "SDCARD");
    drop(volume);

    let mut volume = Volume::new(&mut io);
    assert!(matches!(volume.mount_partition(2), Err(Error::Format(FormatError::Partition(2)))));
}

#[test]
fn test_mount_errors() {
    common::init();
    let mut volume = Volume::new(sdfs::io::mem::MemIO::new(1024, 9));
    assert_eq!(volume.state(), MountState::Unmounted);
    assert!(matches!(volume.free_cluster_count(), Err(Error::NotMounted)));
    assert!(matches!(volume.mount(), Err(Error::Format(FormatError::NoFilesystem))));
    assert!(matches!(volume.mount(), Err(Error::NotMounted)));
    let io = common::unmount(volume);
    assert_eq!(io.as_bytes().len(), 1024 * 512);

    let image = FatImage::fat32_64mib();
    let mut volume = Volume::new(image.build());
    assert!(matches!(volume.mount_partition(1), Err(Error::Format(FormatError::Partition(1)))));

    let mut volume = common::mount(image.build());
    volume.mount().unwrap();
    let file = volume.create("/BUSY").unwrap();
    let volume = match volume.try_free() {
        Ok(_) => panic!("freed with an open file"),
        Err(volume) => volume,
    };
    drop(file);
    common::unmount(volume);
}
