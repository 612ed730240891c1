// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! End-to-end volume behaviour, with and without the write-back cache

use std::fs;
use std::sync::Arc;
use std::thread;
use vdrive_core::{
    Backing, CacheMedium, CacheMode, CallerIdentity, FaultErrno, FaultOp, FaultPolicy, FaultRule,
    FsError, Timestamp, Volume, VolumeConfig, FALLOC_FL_KEEP_SIZE,
};

fn caller() -> CallerIdentity {
    CallerIdentity { uid: 1000, gid: 1000 }
}

fn memory_volume() -> Volume {
    let _ = tracing_subscriber::fmt::try_init();
    Volume::new(VolumeConfig::default()).unwrap()
}

fn cached_volume(block_size: u64) -> Volume {
    let _ = tracing_subscriber::fmt::try_init();
    Volume::new(VolumeConfig {
        cache: CacheMode::WriteBack {
            block_size,
            medium: CacheMedium::Memory,
        },
        ..VolumeConfig::default()
    })
    .unwrap()
}

fn each_volume() -> Vec<(&'static str, Volume)> {
    vec![("memory", memory_volume()), ("write-back", cached_volume(4))]
}

fn read_all(volume: &Volume, path: &str) -> Vec<u8> {
    let size = volume.getattr(path).unwrap().size as usize;
    let h = volume.open(path).unwrap();
    let mut buf = vec![0u8; size];
    let mut done = 0;
    while done < size {
        done += volume.read(h, done as u64, &mut buf[done..]).unwrap();
    }
    volume.close(h).unwrap();
    buf
}

#[test]
fn write_then_read_in_new_directory() {
    for (label, volume) in each_volume() {
        volume.mkdir("/a", 0o755, caller()).unwrap();
        let h = volume.create_file("/a/b.txt", 0o644, caller()).unwrap();
        assert_eq!(volume.getattr("/a/b.txt").unwrap().size, 0, "{label}");
        assert_eq!(volume.write(h, 0, b"0123456789").unwrap(), 10, "{label}");

        let mut buf = [0u8; 10];
        assert_eq!(volume.read(h, 0, &mut buf).unwrap(), 10, "{label}");
        assert_eq!(&buf, b"0123456789", "{label}");
        assert_eq!(volume.getattr("/a/b.txt").unwrap().size, 10, "{label}");
        volume.close(h).unwrap();

        let attrs = volume.getattr("/a/b.txt").unwrap();
        assert_eq!((attrs.uid, attrs.gid), (1000, 1000), "{label}");
        assert_eq!(read_all(&volume, "/a/b.txt"), b"0123456789", "{label}");
    }
}

#[test]
fn read_past_end_is_range_beyond_end() {
    for (label, volume) in each_volume() {
        let h = volume.create_file("/f", 0o644, caller()).unwrap();
        volume.write(h, 0, b"abc").unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(volume.read(h, 3, &mut buf), Err(FsError::RangeBeyondEnd)), "{label}");
        assert_eq!(volume.read(h, 1, &mut buf).unwrap(), 2, "{label}");
        assert_eq!(volume.read(h, 99, &mut []).unwrap(), 0, "{label}");
        volume.close(h).unwrap();
    }
}

#[test]
fn rename_moves_nested_descendants() {
    for (label, volume) in each_volume() {
        volume.mkdir("/x", 0o755, caller()).unwrap();
        volume.mkdir("/x/child", 0o755, caller()).unwrap();
        let h = volume.create_file("/x/child/f", 0o644, caller()).unwrap();
        volume.write(h, 0, b"payload").unwrap();
        volume.close(h).unwrap();

        volume.rename("/x", "/y", false).unwrap();
        assert!(volume.getattr("/y/child/f").is_ok(), "{label}");
        assert!(matches!(volume.getattr("/x/child/f"), Err(FsError::NotFound)), "{label}");
        assert!(matches!(volume.getattr("/x"), Err(FsError::NotFound)), "{label}");
        assert_eq!(read_all(&volume, "/y/child/f"), b"payload", "{label}");
        assert!(volume
            .namespace()
            .paths()
            .iter()
            .all(|p| !p.starts_with("/x")));
    }
}

#[test]
fn rename_replaces_file_and_keeps_cached_bytes() {
    let volume = cached_volume(4);
    let a = volume.create_file("/a", 0o644, caller()).unwrap();
    volume.write(a, 0, b"from a").unwrap();
    let b = volume.create_file("/b", 0o644, caller()).unwrap();
    volume.write(b, 0, b"stale b contents").unwrap();
    volume.close(b).unwrap();

    assert!(matches!(volume.rename("/a", "/b", false), Err(FsError::AlreadyExists)));
    volume.rename("/a", "/b", true).unwrap();
    // The open handle follows the file to its new name
    volume.write(a, 6, b"!").unwrap();
    volume.close(a).unwrap();
    assert_eq!(read_all(&volume, "/b"), b"from a!");
}

#[test]
fn replaced_file_handle_keeps_to_its_own_bytes() {
    for (label, volume) in each_volume() {
        let a = volume.create_file("/a", 0o644, caller()).unwrap();
        volume.write(a, 0, b"AAAA").unwrap();
        let b = volume.create_file("/b", 0o644, caller()).unwrap();
        volume.write(b, 0, b"BBBB").unwrap();
        volume.rename("/a", "/b", true).unwrap();

        assert_eq!(volume.write(b, 0, b"ZZ").unwrap(), 2, "{label}");
        let mut buf = [0u8; 8];
        assert_eq!(volume.read(b, 0, &mut buf).unwrap(), 2, "{label}");
        assert_eq!(&buf[..2], b"ZZ", "{label}");
        volume.close(b).unwrap();
        assert_eq!(read_all(&volume, "/b"), b"AAAA", "{label}");

        volume.write(a, 4, b"!").unwrap();
        volume.close(a).unwrap();
        assert_eq!(read_all(&volume, "/b"), b"AAAA!", "{label}");
    }
}

#[test]
fn unlinked_file_handle_never_reaches_its_successor() {
    for (label, volume) in each_volume() {
        let old = volume.create_file("/f", 0o644, caller()).unwrap();
        volume.write(old, 0, b"old!").unwrap();
        volume.unlink("/f").unwrap();
        let new = volume.create_file("/f", 0o644, caller()).unwrap();
        volume.write(new, 0, b"new!").unwrap();

        assert_eq!(volume.write(old, 0, b"XX").unwrap(), 2, "{label}");
        volume.close(old).unwrap();
        assert_eq!(read_all(&volume, "/f"), b"new!", "{label}");

        // The successor's entry is still open and flushes on its own close
        volume.write(new, 4, b"?").unwrap();
        volume.close(new).unwrap();
        assert_eq!(read_all(&volume, "/f"), b"new!?", "{label}");
    }
}

#[test]
fn racing_extending_writes_reach_the_staged_file() {
    let volume = cached_volume(4);
    for round in 0..20 {
        let path = format!("/f{round}");
        let h = volume.create_file(&path, 0o644, caller()).unwrap();
        thread::scope(|scope| {
            scope.spawn(|| volume.write(h, 0, &[1u8; 100]).unwrap());
            scope.spawn(|| volume.write(h, 0, &[2u8; 10]).unwrap());
        });
        let staged = volume.namespace().lookup(&path).unwrap();
        assert_eq!(staged.size(), 100);

        volume.close(h).unwrap();
        let mut bytes = vec![0u8; 100];
        assert_eq!(staged.read(0, &mut bytes).unwrap(), 100);
        assert!(bytes[10..].iter().all(|b| *b == 1), "round {round}");
    }
}

#[test]
fn masked_enumeration_ignores_concurrent_siblings() {
    for (label, volume) in each_volume() {
        volume.mkdir("/d", 0o755, caller()).unwrap();
        for name in ["a.txt", "b.log", "c.txt"] {
            let h = volume.create_file(&format!("/d/{name}"), 0o644, caller()).unwrap();
            volume.close(h).unwrap();
        }
        let cursor = volume.opendir("/d", Some("*.txt")).unwrap();
        thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..20 {
                    let h = volume
                        .create_file(&format!("/d/extra{i}.log"), 0o644, caller())
                        .unwrap();
                    volume.close(h).unwrap();
                }
            });
            let mut names = Vec::new();
            while let Some(entry) = volume.readdir(cursor).unwrap() {
                names.push(entry.name);
            }
            assert_eq!(names, vec!["a.txt", "c.txt"], "{label}");
        });
        volume.closedir(cursor).unwrap();
    }
}

#[test]
fn enumeration_skips_deleted_and_rewinds() {
    let volume = memory_volume();
    volume.mkdir("/d", 0o755, caller()).unwrap();
    for name in ["one", "two", "three"] {
        let h = volume.create_file(&format!("/d/{name}"), 0o644, caller()).unwrap();
        volume.close(h).unwrap();
    }
    let cursor = volume.opendir("/d", None).unwrap();
    volume.unlink("/d/three").unwrap();
    let mut names = Vec::new();
    while let Some(entry) = volume.readdir(cursor).unwrap() {
        names.push(entry.name);
    }
    assert_eq!(names, vec!["one", "two"]);

    let h = volume.create_file("/d/four", 0o644, caller()).unwrap();
    volume.close(h).unwrap();
    volume.rewinddir(cursor).unwrap();
    let mut names = Vec::new();
    while let Some(entry) = volume.readdir(cursor).unwrap() {
        names.push(entry.name);
    }
    assert_eq!(names, vec!["four", "one", "two"]);
    volume.closedir(cursor).unwrap();
}

#[test]
fn shrink_then_grow_reads_zeros() {
    for (label, volume) in each_volume() {
        let h = volume.create_file("/f", 0o644, caller()).unwrap();
        volume.write(h, 0, &[0xAB; 12]).unwrap();
        volume.truncate("/f", 5).unwrap();
        volume.truncate("/f", 12).unwrap();
        let mut buf = [0xFFu8; 12];
        assert_eq!(volume.read(h, 0, &mut buf).unwrap(), 12, "{label}");
        assert_eq!(&buf[..5], &[0xAB; 5], "{label}");
        assert_eq!(&buf[5..], &[0u8; 7], "{label}");
        volume.close(h).unwrap();
        assert_eq!(read_all(&volume, "/f")[5..], [0u8; 7], "{label}");
    }
}

#[test]
fn concurrent_opens_share_one_cache_entry() {
    let volume = cached_volume(8);
    let h = volume.create_file("/shared", 0o644, caller()).unwrap();
    volume.write(h, 0, b"shared bytes").unwrap();
    volume.close(h).unwrap();

    let volume = Arc::new(volume);
    let openers: Vec<_> = (0..2)
        .map(|_| {
            let volume = Arc::clone(&volume);
            thread::spawn(move || volume.open("/shared").unwrap())
        })
        .collect();
    let handles: Vec<_> = openers.into_iter().map(|t| t.join().unwrap()).collect();
    assert_ne!(handles[0], handles[1]);
    let file = volume.namespace().lookup("/shared").unwrap();
    assert_eq!(file.open_count(), 2);

    volume.write(handles[1], 0, b"SHARED").unwrap();
    volume.close(handles[0]).unwrap();
    assert_eq!(file.open_count(), 1);
    let mut buf = [0u8; 6];
    volume.read(handles[1], 0, &mut buf).unwrap();
    assert_eq!(&buf, b"SHARED");
    let mut staged = [0u8; 6];
    file.read(0, &mut staged).unwrap();
    assert_eq!(&staged, b"shared");

    volume.close(handles[1]).unwrap();
    assert_eq!(file.open_count(), 0);
    let mut staged = [0u8; 12];
    file.read(0, &mut staged).unwrap();
    assert_eq!(&staged, b"SHARED bytes");
}

#[test]
fn case_insensitive_windows_volume() {
    let _ = tracing_subscriber::fmt::try_init();
    let volume = Volume::new(VolumeConfig::windows()).unwrap();
    volume.mkdir("\\Docs", 0o755, caller()).unwrap();
    let h = volume.create_file("\\Docs\\Read.ME", 0o644, caller()).unwrap();
    volume.close(h).unwrap();

    assert!(volume.getattr("\\docs\\README").is_err());
    assert_eq!(volume.getattr("\\DOCS\\read.me").unwrap().name, "Read.ME");
    assert!(matches!(
        volume.create_file("\\docs\\READ.me", 0o644, caller()),
        Err(FsError::AlreadyExists)
    ));

    let cursor = volume.opendir("\\Docs", Some("*.me")).unwrap();
    assert_eq!(volume.readdir(cursor).unwrap().unwrap().name, "Read.ME");
    volume.closedir(cursor).unwrap();
}

#[test]
fn unlink_and_rmdir_rules() {
    for (label, volume) in each_volume() {
        volume.mkdir("/d", 0o755, caller()).unwrap();
        let h = volume.create_file("/d/f", 0o644, caller()).unwrap();
        volume.write(h, 0, b"x").unwrap();
        volume.close(h).unwrap();

        assert!(matches!(volume.unlink("/d"), Err(FsError::IsADirectory)), "{label}");
        assert!(matches!(volume.rmdir("/d/f"), Err(FsError::NotADirectory)), "{label}");
        assert!(matches!(volume.rmdir("/d"), Err(FsError::DirectoryNotEmpty)), "{label}");
        assert!(matches!(volume.rmdir("/"), Err(FsError::InvalidArgument)), "{label}");
        volume.unlink("/d/f").unwrap();
        volume.rmdir("/d").unwrap();
        assert!(matches!(volume.getattr("/d"), Err(FsError::NotFound)), "{label}");

        // A recreated file starts empty even with a cache in front
        let h = volume.create_file("/d2", 0o644, caller()).unwrap();
        volume.close(h).unwrap();
        assert_eq!(volume.getattr("/d2").unwrap().size, 0, "{label}");
    }
}

#[test]
fn metadata_updates() {
    let volume = memory_volume();
    let h = volume.create_file("/f", 0o600, caller()).unwrap();
    volume.close(h).unwrap();
    volume.chmod("/f", 0o644).unwrap();
    volume.chown("/f", Some(0), None).unwrap();
    let stamp = Timestamp::UNIX_EPOCH_TICKS + 10_000_000;
    volume
        .set_times("/f", Timestamp::EMPTY, Timestamp(stamp), Timestamp(stamp))
        .unwrap();
    let attrs = volume.getattr("/f").unwrap();
    assert_eq!(attrs.mode & 0o777, 0o644);
    assert_eq!((attrs.uid, attrs.gid), (0, 1000));
    assert_eq!(attrs.written, Timestamp(stamp));
    assert!(!attrs.created.is_empty());
}

#[test]
fn statfs_tracks_usage() {
    let volume = memory_volume();
    let before = volume.statfs();
    assert_eq!(before.free_sectors, before.total_sectors);
    let h = volume.create_file("/f", 0o644, caller()).unwrap();
    volume.write(h, 0, &vec![1u8; 4096]).unwrap();
    volume.close(h).unwrap();
    let after = volume.statfs();
    assert_eq!(after.used_bytes, 4096);
    assert_eq!(after.free_sectors, before.total_sectors - 8);
}

#[test]
fn injected_flush_failure_reports_io_on_close() {
    let _ = tracing_subscriber::fmt::try_init();
    let volume = Volume::new(VolumeConfig {
        cache: CacheMode::WriteBack {
            block_size: 4,
            medium: CacheMedium::Memory,
        },
        faults: Some(FaultPolicy {
            enabled: true,
            rules: vec![FaultRule {
                op: FaultOp::Close,
                errno: FaultErrno::Eio,
                start_after: 0,
                max_faults: Some(1),
            }],
        }),
        ..VolumeConfig::default()
    })
    .unwrap();
    let h = volume.create_file("/f", 0o644, caller()).unwrap();
    volume.write(h, 0, b"data").unwrap();
    assert!(matches!(volume.close(h), Err(FsError::Io(_))));
    assert!(volume.handles().is_empty());
    assert!(matches!(volume.close(h), Err(FsError::InvalidHandle)));
}

#[test]
fn disk_backed_cache_round_trip() {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().unwrap();
    let volume = Volume::new(VolumeConfig {
        cache: CacheMode::WriteBack {
            block_size: 16,
            medium: CacheMedium::Disk {
                root: dir.path().join("blocks"),
            },
        },
        ..VolumeConfig::default()
    })
    .unwrap();
    let h = volume.create_file("/big", 0o644, caller()).unwrap();
    let data: Vec<u8> = (0..100u8).collect();
    volume.write(h, 0, &data).unwrap();
    volume.close(h).unwrap();
    assert_eq!(read_all(&volume, "/big"), data);
}

#[test]
fn fallocate_stays_within_drive_size() {
    let caches = [
        CacheMode::Disabled,
        CacheMode::WriteBack {
            block_size: 4,
            medium: CacheMedium::Memory,
        },
    ];
    for cache in caches {
        let volume = Volume::new(VolumeConfig {
            drive_size: 4096,
            cache,
            ..VolumeConfig::default()
        })
        .unwrap();
        let h = volume.create_file("/f", 0o644, caller()).unwrap();
        assert!(matches!(
            volume.fallocate(h, FALLOC_FL_KEEP_SIZE, 0, 64 << 20),
            Err(FsError::NoSpace)
        ));
        assert!(matches!(volume.fallocate(h, 0, 0, 8192), Err(FsError::NoSpace)));
        let attrs = volume.getattr("/f").unwrap();
        assert_eq!((attrs.size, attrs.allocation_size), (0, 0));

        volume.fallocate(h, FALLOC_FL_KEEP_SIZE, 0, 4096).unwrap();
        volume.fallocate(h, 0, 0, 1024).unwrap();
        // Already reserved, so no new space is needed
        volume.fallocate(h, FALLOC_FL_KEEP_SIZE, 0, 4096).unwrap();
        let attrs = volume.getattr("/f").unwrap();
        assert_eq!((attrs.size, attrs.allocation_size), (1024, 4096));
        volume.close(h).unwrap();
    }
}

#[test]
fn folder_backed_volume_keeps_host_files_in_step() {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir().unwrap();
    let share = dir.path().join("share");
    let config = VolumeConfig {
        cache: CacheMode::WriteBack {
            block_size: 4,
            medium: CacheMedium::Memory,
        },
        backing: Backing::Folder {
            root: share.clone(),
        },
        ..VolumeConfig::default()
    };
    assert!(matches!(
        Volume::new(VolumeConfig {
            cache: CacheMode::Disabled,
            ..config.clone()
        }),
        Err(FsError::InvalidArgument)
    ));
    let volume = Volume::new(config).unwrap();

    volume.mkdir("/docs", 0o755, caller()).unwrap();
    let h = volume.create_file("/docs/a.txt", 0o644, caller()).unwrap();
    volume.write(h, 0, b"hello folder").unwrap();
    volume.close(h).unwrap();
    assert_eq!(fs::read(share.join("docs").join("a.txt")).unwrap(), b"hello folder");
    assert_eq!(read_all(&volume, "/docs/a.txt"), b"hello folder");

    volume.rename("/docs", "/papers", false).unwrap();
    assert!(!share.join("docs").exists());
    assert_eq!(fs::read(share.join("papers").join("a.txt")).unwrap(), b"hello folder");
    assert_eq!(read_all(&volume, "/papers/a.txt"), b"hello folder");

    volume.truncate("/papers/a.txt", 5).unwrap();
    assert_eq!(fs::read(share.join("papers").join("a.txt")).unwrap(), b"hello");
    assert_eq!(read_all(&volume, "/papers/a.txt"), b"hello");

    // Whatever an earlier file left under the same name is discarded
    fs::write(share.join("fresh.txt"), b"leftover bytes").unwrap();
    let h = volume.create_file("/fresh.txt", 0o644, caller()).unwrap();
    volume.write(h, 0, b"new").unwrap();
    volume.close(h).unwrap();
    assert_eq!(fs::read(share.join("fresh.txt")).unwrap(), b"new");

    volume.unlink("/papers/a.txt").unwrap();
    assert!(!share.join("papers").join("a.txt").exists());
    volume.rmdir("/papers").unwrap();
    assert!(!share.join("papers").exists());
}

#[test]
fn unmount_resets_volume() {
    let volume = cached_volume(4);
    volume.mkdir("/d", 0o755, caller()).unwrap();
    let h = volume.create_file("/d/f", 0o644, caller()).unwrap();
    volume.write(h, 0, b"unflushed").unwrap();
    let file = volume.namespace().lookup("/d/f").unwrap();

    volume.unmount().unwrap();
    assert!(volume.handles().is_empty());
    assert!(volume.namespace().is_empty());
    assert!(matches!(volume.read(h, 0, &mut [0u8; 1]), Err(FsError::InvalidHandle)));
    assert!(!volume.cache().unwrap().contains("/d/f"));
    assert_eq!(file.size(), 0);

    let h = volume.create_file("/f", 0o644, caller()).unwrap();
    volume.close(h).unwrap();
    assert_eq!(volume.getattr("/f").unwrap().size, 0);
}
