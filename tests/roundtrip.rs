mod common;

use common::MemoryDevice;
use fatlib::fat::FatType;
use fatlib::volume::unspecified_epoch;
use fatlib::{FatFileSystem, MountOptions};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_fat16_device() -> MemoryDevice {
    MemoryDevice::new(512, 8192)
}

fn small_fat32_device() -> MemoryDevice {
    MemoryDevice::new(512, 75_000)
}

#[test]
fn format_then_mount_round_trips_empty_volume() {
    init();
    let mut device = small_fat16_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat16, MountOptions::default()).unwrap();
    fs.close(&mut device).unwrap();

    let fs = FatFileSystem::mount(&mut device, MountOptions::default()).unwrap();
    assert_eq!(fs.fat_type(), FatType::Fat16);
}

#[test]
fn create_write_read_back_a_file() {
    init();
    let mut device = small_fat16_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat16, MountOptions::default()).unwrap();

    let created = unspecified_epoch();
    {
        let (root, fat, bs) = fs.parts().unwrap();
        root.create_file(bs, fat, "HELLO.TXT", created).unwrap();
        let file = root.open_file("HELLO.TXT").unwrap();
        file.write(&mut device, fat, bs, 0, b"hello, disk", created).unwrap();
    }
    fs.flush(&mut device).unwrap();

    let mut fs2 = FatFileSystem::mount(&mut device, MountOptions::default()).unwrap();
    let (root, fat, bs) = fs2.parts().unwrap();
    let file = root.open_file("HELLO.TXT").unwrap();
    assert_eq!(file.len(), b"hello, disk".len() as u32);
    let mut buf = [0u8; 11];
    let n = file.read(&mut device, fat, bs, 0, &mut buf, created).unwrap();
    assert_eq!(&buf[..n], b"hello, disk");

    let mut too_big = [0u8; 32];
    let err = file.read(&mut device, fat, bs, 0, &mut too_big, created);
    assert!(matches!(err, Err(fatlib::Error::Fs(fatlib::FatError::EndOfData))));
}

#[test]
fn long_file_name_round_trips_through_lfn_entries() {
    init();
    let mut device = small_fat16_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat16, MountOptions::default()).unwrap();
    let created = unspecified_epoch();
    let long_name = "a file name that is definitely longer than 8.3 allows.txt";

    {
        let (root, fat, bs) = fs.parts().unwrap();
        root.create_file(bs, fat, long_name, created).unwrap();
    }
    fs.flush(&mut device).unwrap();

    let mut fs2 = FatFileSystem::mount(&mut device, MountOptions::default()).unwrap();
    let (root, _fat, _bs) = fs2.parts().unwrap();
    let entry = root.get_entry(long_name).unwrap();
    assert_eq!(entry.display_name(), long_name);
}

#[test]
fn nested_directories_create_and_open() {
    init();
    let mut device = small_fat32_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat32, MountOptions::default()).unwrap();
    let created = unspecified_epoch();

    {
        let (root, fat, bs) = fs.parts().unwrap();
        root.create_directory(bs, fat, "SUBDIR", created).unwrap();
        let sub = root.open_directory(&mut device, bs, fat, "SUBDIR").unwrap();
        sub.create_file(bs, fat, "INNER.TXT", created).unwrap();
    }
    fs.flush(&mut device).unwrap();

    let mut fs2 = FatFileSystem::mount(&mut device, MountOptions::default()).unwrap();
    let (root, fat, bs) = fs2.parts().unwrap();
    let sub = root.open_directory(&mut device, bs, fat, "SUBDIR").unwrap();
    assert!(sub.get_entry("INNER.TXT").is_ok());
    assert!(!sub.is_empty_dir());
}

#[test]
fn removing_a_non_empty_directory_fails() {
    init();
    let mut device = small_fat32_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat32, MountOptions::default()).unwrap();
    let created = unspecified_epoch();

    let (root, fat, bs) = fs.parts().unwrap();
    root.create_directory(bs, fat, "SUBDIR", created).unwrap();
    {
        let sub = root.open_directory(&mut device, bs, fat, "SUBDIR").unwrap();
        sub.create_file(bs, fat, "INNER.TXT", created).unwrap();
    }
    let err = root.remove(&mut device, bs, fat, "SUBDIR");
    assert!(err.is_err());
}

#[test]
fn removing_a_file_frees_its_clusters() {
    init();
    let mut device = small_fat16_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat16, MountOptions::default()).unwrap();
    let created = unspecified_epoch();

    let (root, fat, bs) = fs.parts().unwrap();
    root.create_file(bs, fat, "BIG.BIN", created).unwrap();
    let payload = vec![0xabu8; bs.bytes_per_cluster() as usize * 3];
    {
        let file = root.open_file("BIG.BIN").unwrap();
        file.write(&mut device, fat, bs, 0, &payload, created).unwrap();
    }
    let free_before = fat.free_cluster_count();
    root.remove(&mut device, bs, fat, "BIG.BIN").unwrap();
    assert!(fat.free_cluster_count() > free_before);
    assert!(root.get_entry("BIG.BIN").is_err());
}

#[test]
fn rename_preserves_content() {
    init();
    let mut device = small_fat16_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat16, MountOptions::default()).unwrap();
    let created = unspecified_epoch();

    let (root, fat, bs) = fs.parts().unwrap();
    root.create_file(bs, fat, "OLD.TXT", created).unwrap();
    {
        let file = root.open_file("OLD.TXT").unwrap();
        file.write(&mut device, fat, bs, 0, b"payload", created).unwrap();
    }
    root.rename(bs, fat, "OLD.TXT", "a much longer renamed file.txt").unwrap();
    assert!(root.get_entry("OLD.TXT").is_err());
    let entry = root.get_entry("a much longer renamed file.txt").unwrap();
    assert_eq!(entry.short.file_size, 7);
}

#[test]
fn move_between_directories_updates_dot_dot_target() {
    init();
    let mut device = small_fat32_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat32, MountOptions::default()).unwrap();
    let created = unspecified_epoch();

    let (root, fat, bs) = fs.parts().unwrap();
    root.create_directory(bs, fat, "A", created).unwrap();
    root.create_directory(bs, fat, "B", created).unwrap();
    {
        let a = root.open_directory(&mut device, bs, fat, "A").unwrap();
        a.create_directory(bs, fat, "CHILD", created).unwrap();
    }

    // Split the borrow: move CHILD from A into B.
    let a_entry = root.open_directory(&mut device, bs, fat, "A").unwrap();
    let (_, short, child) = a_entry.take_entry(bs, fat, "CHILD").unwrap();
    let b = root.open_directory(&mut device, bs, fat, "B").unwrap();
    b.put_entry(bs, fat, "CHILD", short, child).unwrap();

    let b_again = root.open_directory(&mut device, bs, fat, "B").unwrap();
    let moved = b_again.open_directory(&mut device, bs, fat, "CHILD").unwrap();
    assert!(moved.is_empty_dir());
}

#[test]
fn directory_full_rolls_back_cleanly() {
    // The FAT12/16 root has a hard, fixed capacity (root_entry_count).
    // Filling it past that must fail with DirectoryFull without leaving a
    // half-added entry behind.
    init();
    let mut device = MemoryDevice::new(512, 4096);
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat16, MountOptions::default()).unwrap();
    let created = unspecified_epoch();
    let (root, fat, bs) = fs.parts().unwrap();

    let mut created_count = 0;
    let mut hit_full = false;
    for i in 0..2000 {
        let name = alloc_name(i);
        match root.create_file(bs, fat, &name, created) {
            Ok(()) => created_count += 1,
            Err(fatlib::FatError::DirectoryFull { .. }) => {
                hit_full = true;
                assert!(root.get_entry(&name).is_err());
                break;
            }
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
    assert!(hit_full, "expected the fixed-size root to fill up");
    assert!(created_count > 0);
}

fn alloc_name(i: usize) -> String {
    std::format!("F{}.TXT", i)
}

#[test]
fn read_only_mount_rejects_every_mutation() {
    init();
    let mut device = small_fat16_device();
    let mut fs = FatFileSystem::format(&mut device, FatType::Fat16, MountOptions::default()).unwrap();
    let created = unspecified_epoch();
    {
        let (root, fat, bs) = fs.parts().unwrap();
        root.create_file(bs, fat, "HELLO.TXT", created).unwrap();
        let file = root.open_file("HELLO.TXT").unwrap();
        file.write(&mut device, fat, bs, 0, b"hello, disk", created).unwrap();
    }
    fs.close(&mut device).unwrap();

    let mut fs = FatFileSystem::mount(
        &mut device,
        MountOptions { read_only: true, ignore_fat_differences: false },
    )
    .unwrap();
    let (root, fat, bs) = fs.parts().unwrap();

    let err = root.create_file(bs, fat, "NEW.TXT", created);
    assert!(matches!(err, Err(fatlib::FatError::ReadOnly)));

    let file = root.open_file("HELLO.TXT").unwrap();
    let err = file.write(&mut device, fat, bs, 0, b"x", created);
    assert!(err.is_err());

    let mut buf = [0u8; 11];
    let n = file.read(&mut device, fat, bs, 0, &mut buf, created).unwrap();
    assert_eq!(&buf[..n], b"hello, disk");
}
