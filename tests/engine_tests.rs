//! Tests for Engine
//!
//! These tests verify:
//! - Round-trip, overwrite and missing-key behaviour
//! - Version increments on overwrite
//! - Isolation across keys, including keys forced into one chain
//! - Request validation (key width, value size)
//! - Out-of-memory reporting under the ReturnError policy
//! - Freed ranges are reused, including those left by finished threads
//! - Concurrent writers on distinct and identical keys

use std::fs::File;
use std::io::Read;
use std::sync::Barrier;
use std::thread;

use nvmkv::config::{Config, OomPolicy, PersistStrategy};
use nvmkv::engine::Engine;
use nvmkv::NvmError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config_in(temp: &TempDir) -> Config {
    Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(4 * 1024 * 1024)
        .block_per_segment(1024)
        .bucket_count(4096)
        .key_capacity(16 * 1024)
        .persist(PersistStrategy::OsManaged)
        .oom_policy(OomPolicy::ReturnError)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_in(&temp_dir)).unwrap();
    (temp_dir, engine)
}

/// 16-byte key derived from a number
fn key(i: u32) -> [u8; 16] {
    let mut key = *b"key-000000000000";
    key[4..14].copy_from_slice(format!("{:010}", i).as_bytes());
    key
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_set_get() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(b"hello-world-0001", b"world").unwrap();
    let result = engine.get(b"hello-world-0001").unwrap();

    assert_eq!(result, Some(b"world".to_vec()));
}

#[test]
fn test_engine_get_nonexistent_key() {
    let (_temp, engine) = setup_temp_engine();

    let result = engine.get(b"nonexistent-key!").unwrap();

    assert_eq!(result, None);
    assert_eq!(engine.version(b"nonexistent-key!").unwrap(), None);
}

#[test]
fn test_engine_empty_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(&key(1), b"").unwrap();

    assert_eq!(engine.get(&key(1)).unwrap(), Some(Vec::new()));
}

#[test]
fn test_engine_max_size_value() {
    let (_temp, engine) = setup_temp_engine();
    let value: Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();

    engine.set(&key(1), &value).unwrap();

    assert_eq!(engine.get(&key(1)).unwrap(), Some(value));
}

#[test]
fn test_engine_binary_key_and_value() {
    let (_temp, engine) = setup_temp_engine();
    let key = [0u8, 255, 1, 254, 2, 253, 3, 252, 0, 0, 0, 0, 128, 127, 10, 13];
    let value = vec![0u8, 255, 0, 255, 10, 13];

    engine.set(&key, &value).unwrap();

    assert_eq!(engine.get(&key).unwrap(), Some(value));
}

#[test]
fn test_engine_get_into_reuses_buffer() {
    let (_temp, engine) = setup_temp_engine();
    engine.set(&key(1), b"short").unwrap();
    let mut buf = b"previous contents that are longer".to_vec();

    assert!(engine.get_into(&key(1), &mut buf).unwrap());
    assert_eq!(buf, b"short");

    assert!(!engine.get_into(&key(2), &mut buf).unwrap());
    assert_eq!(buf, b"short");
}

// =============================================================================
// Overwrite Tests
// =============================================================================

#[test]
fn test_engine_overwrite() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(&key(1), b"value1").unwrap();
    engine.set(&key(1), b"value2").unwrap();

    assert_eq!(engine.get(&key(1)).unwrap(), Some(b"value2".to_vec()));
}

#[test]
fn test_engine_overwrite_increments_version() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(&key(1), b"v1").unwrap();
    let first = engine.version(&key(1)).unwrap().unwrap();
    engine.set(&key(1), b"v2").unwrap();
    let second = engine.version(&key(1)).unwrap().unwrap();

    assert_eq!(first, 0);
    assert_eq!(second, first + 1);
}

#[test]
fn test_engine_overwrite_grow_and_shrink() {
    let (_temp, engine) = setup_temp_engine();
    let key = *b"AAAAAAAAAAAAAAAA";

    engine.set(&key, &[b'x'; 80]).unwrap();
    assert_eq!(engine.get(&key).unwrap(), Some(vec![b'x'; 80]));
    assert_eq!(engine.version(&key).unwrap(), Some(0));

    engine.set(&key, &[b'y'; 250]).unwrap();
    assert_eq!(engine.get(&key).unwrap(), Some(vec![b'y'; 250]));
    assert_eq!(engine.version(&key).unwrap(), Some(1));

    engine.set(&key, &[b'z'; 240]).unwrap();
    assert_eq!(engine.get(&key).unwrap(), Some(vec![b'z'; 240]));
    assert_eq!(engine.version(&key).unwrap(), Some(2));
}

#[test]
fn test_worker_reuses_range_freed_by_grown_value() {
    let (temp, engine) = setup_temp_engine();
    let mut worker = engine.worker();
    let first = *b"AAAAAAAAAAAAAAAA";
    let second = *b"BBBBBBBBBBBBBBBB";

    // a fresh worker bump-allocates from block 0: 80 bytes take blocks 0..2
    assert_eq!(worker.set(&first, &[b'x'; 80]).unwrap(), 0);
    // 250 bytes take blocks 2..7, then 0..2 goes to the free list
    assert_eq!(worker.set(&first, &[b'y'; 250]).unwrap(), 1);
    assert_eq!(worker.alloc_stats().recycled, 1);
    assert_eq!(worker.alloc_stats().free_list_hits, 0);

    // a smaller record of the same size class lands on the freed range
    worker.set(&second, &[b'z'; 60]).unwrap();
    assert_eq!(worker.alloc_stats().free_list_hits, 1);

    let mut header = [0u8; 18];
    File::open(temp.path().join("engine.pmem"))
        .unwrap()
        .read_exact(&mut header)
        .unwrap();
    assert_eq!(u16::from_le_bytes([header[0], header[1]]), 60);
    assert_eq!(&header[2..18], &second);

    assert_eq!(engine.get(&first).unwrap(), Some(vec![b'y'; 250]));
    assert_eq!(engine.get(&second).unwrap(), Some(vec![b'z'; 60]));
}

#[test]
fn test_engine_overwrite_does_not_add_keys() {
    let (_temp, engine) = setup_temp_engine();

    for i in 0..10 {
        engine.set(&key(7), format!("value{}", i).as_bytes()).unwrap();
    }

    assert_eq!(engine.stats().keys, 1);
    assert_eq!(engine.version(&key(7)).unwrap(), Some(9));
}

// =============================================================================
// Isolation Tests
// =============================================================================

#[test]
fn test_engine_isolation_across_keys() {
    let (_temp, engine) = setup_temp_engine();

    engine.set(&key(1), b"v1").unwrap();
    engine.set(&key(2), b"v2").unwrap();

    assert_eq!(engine.get(&key(1)).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(&key(2)).unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_engine_single_bucket_chain() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(4 * 1024 * 1024)
        .block_per_segment(1024)
        .bucket_count(1)
        .key_capacity(1024)
        .persist(PersistStrategy::OsManaged)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..200 {
        engine.set(&key(i), format!("value{}", i).as_bytes()).unwrap();
    }
    for i in (0..200).step_by(3) {
        engine.set(&key(i), format!("updated{}", i).as_bytes()).unwrap();
    }

    for i in 0..200 {
        let expected = if i % 3 == 0 {
            format!("updated{}", i)
        } else {
            format!("value{}", i)
        };
        assert_eq!(engine.get(&key(i)).unwrap(), Some(expected.into_bytes()));
    }
    assert_eq!(engine.stats().keys, 200);
}

#[test]
fn test_engine_many_keys() {
    let (_temp, engine) = setup_temp_engine();

    for i in 0..5000 {
        engine.set(&key(i), format!("value-{}", i).as_bytes()).unwrap();
    }

    for i in 0..5000 {
        assert_eq!(
            engine.get(&key(i)).unwrap(),
            Some(format!("value-{}", i).into_bytes())
        );
    }
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_engine_rejects_wrong_key_width() {
    let (_temp, engine) = setup_temp_engine();

    assert!(matches!(
        engine.set(b"short", b"v"),
        Err(NvmError::InvalidKey { len: 5, expected: 16 })
    ));
    assert!(matches!(
        engine.get(b"this key is much longer than sixteen"),
        Err(NvmError::InvalidKey { .. })
    ));
}

#[test]
fn test_engine_rejects_oversized_value() {
    let (_temp, engine) = setup_temp_engine();

    let result = engine.set(&key(1), &[0u8; 1025]);

    assert!(matches!(
        result,
        Err(NvmError::ValueTooLarge { len: 1025, max: 1024 })
    ));
    assert_eq!(engine.get(&key(1)).unwrap(), None);
}

#[test]
fn test_engine_rejects_invalid_config() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .bucket_count(0)
        .build();

    assert!(matches!(Engine::open(config), Err(NvmError::Config(_))));
}

// =============================================================================
// Capacity Tests
// =============================================================================

#[test]
fn test_engine_region_exhaustion_reports_out_of_memory() {
    let temp = TempDir::new().unwrap();
    // 64 blocks of 64 bytes; each 80-byte value needs 2 blocks
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(64 * 64)
        .block_per_segment(16)
        .bucket_count(64)
        .key_capacity(1024)
        .persist(PersistStrategy::OsManaged)
        .oom_policy(OomPolicy::ReturnError)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..32 {
        engine.set(&key(i), &[1u8; 80]).unwrap();
    }
    let err = engine.set(&key(32), &[1u8; 80]).unwrap_err();

    assert!(matches!(err, NvmError::OutOfMemory(_)));
    assert_eq!(err.status(), nvmkv::Status::OutOfMemory);
    // existing data is untouched
    assert_eq!(engine.get(&key(0)).unwrap(), Some(vec![1u8; 80]));
}

#[test]
fn test_engine_key_capacity_exhaustion() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(1024 * 1024)
        .bucket_count(64)
        .key_capacity(4)
        .persist(PersistStrategy::OsManaged)
        .oom_policy(OomPolicy::ReturnError)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..4 {
        engine.set(&key(i), b"v").unwrap();
    }

    assert!(matches!(
        engine.set(&key(4), b"v"),
        Err(NvmError::OutOfMemory(_))
    ));
    // updates of existing keys still work
    engine.set(&key(0), b"w").unwrap();
    assert_eq!(engine.get(&key(0)).unwrap(), Some(b"w".to_vec()));
}

#[test]
fn test_engine_short_lived_threads_do_not_strand_segments() {
    let temp = TempDir::new().unwrap();
    // 8 segments of 64 blocks
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(8 * 64 * 64)
        .block_per_segment(64)
        .bucket_count(256)
        .key_capacity(1024)
        .persist(PersistStrategy::OsManaged)
        .oom_policy(OomPolicy::ReturnError)
        .build();
    let engine = Engine::open(config).unwrap();

    // each thread claims a segment for a single one-block record, then exits
    for i in 0..64u32 {
        thread::scope(|s| {
            s.spawn(|| engine.set(&key(i), b"v").unwrap());
        });
    }

    for i in 0..64u32 {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(b"v".to_vec()));
    }
    let stats = engine.stats().allocator;
    assert_eq!(stats.segments_issued, 8);
    // the finished threads' segment tails were reclaimed, nothing is stranded
    assert_eq!(stats.shared_free_blocks, 8 * 64 - 64);
}

#[test]
fn test_engine_short_lived_threads_under_abort_policy() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(4 * 64 * 64)
        .block_per_segment(64)
        .bucket_count(256)
        .key_capacity(1024)
        .persist(PersistStrategy::OsManaged)
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..16u32 {
        thread::scope(|s| {
            s.spawn(|| engine.set(&key(i), &[i as u8; 40]).unwrap());
        });
    }

    for i in 0..16u32 {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(vec![i as u8; 40]));
    }
}

#[test]
fn test_engine_overwrites_reuse_space() {
    let temp = TempDir::new().unwrap();
    // 128 blocks total: far fewer than 1000 writes of 2 blocks each
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(128 * 64)
        .block_per_segment(64)
        .bucket_count(64)
        .key_capacity(64)
        .persist(PersistStrategy::OsManaged)
        .oom_policy(OomPolicy::ReturnError)
        .build();
    let engine = Engine::open(config).unwrap();

    for round in 0..1000u32 {
        engine
            .set(&key(round % 4), format!("{:080}", round).as_bytes())
            .unwrap();
    }

    for i in 996..1000u32 {
        assert_eq!(
            engine.get(&key(i % 4)).unwrap(),
            Some(format!("{:080}", i).into_bytes())
        );
    }
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_engine_concurrent_writers_distinct_keys() {
    let (_temp, engine) = setup_temp_engine();
    let threads = 8;
    let per_thread = 500;

    thread::scope(|s| {
        for t in 0..threads {
            let engine = &engine;
            s.spawn(move || {
                for i in 0..per_thread {
                    let id = t * per_thread + i;
                    engine.set(&key(id), format!("value-{}", id).as_bytes()).unwrap();
                }
            });
        }
    });

    for id in 0..threads * per_thread {
        assert_eq!(
            engine.get(&key(id)).unwrap(),
            Some(format!("value-{}", id).into_bytes())
        );
    }
    assert_eq!(engine.stats().keys, threads * per_thread);
    assert_eq!(engine.stats().workers, threads as usize);
}

#[test]
fn test_engine_concurrent_workers_distinct_keys() {
    let (_temp, engine) = setup_temp_engine();

    thread::scope(|s| {
        for t in 0..4u32 {
            let engine = &engine;
            s.spawn(move || {
                let mut worker = engine.worker();
                for i in 0..500 {
                    let id = t * 500 + i;
                    worker.set(&key(id), &id.to_le_bytes()).unwrap();
                }
            });
        }
    });

    for id in 0..2000u32 {
        assert_eq!(engine.get(&key(id)).unwrap(), Some(id.to_le_bytes().to_vec()));
    }
}

#[test]
fn test_engine_concurrent_first_insert_links_key_once() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("engine.pmem"))
        .file_size(4 * 1024 * 1024)
        .block_per_segment(1024)
        .bucket_count(1)
        .key_capacity(4096)
        .persist(PersistStrategy::OsManaged)
        .build();
    let engine = Engine::open(config).unwrap();
    let threads = 8;

    for round in 0..50u32 {
        let barrier = Barrier::new(threads);
        thread::scope(|s| {
            for t in 0..threads {
                let engine = &engine;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    engine.set(&key(round), &[t as u8; 32]).unwrap();
                });
            }
        });

        let value = engine.get(&key(round)).unwrap().unwrap();
        assert_eq!(value.len(), 32);
        assert!(value.iter().all(|&b| b == value[0]));
        // every racing write is either the insert or a later version
        assert_eq!(engine.version(&key(round)).unwrap(), Some(threads as u16 - 1));
    }
}

#[test]
fn test_engine_concurrent_updates_same_key_lose_nothing() {
    let (_temp, engine) = setup_temp_engine();
    engine.set(&key(0), b"initial").unwrap();
    let threads = 4;
    let per_thread = 250;

    thread::scope(|s| {
        for t in 0..threads {
            let engine = &engine;
            s.spawn(move || {
                for i in 0..per_thread {
                    engine.set(&key(0), format!("t{}-{}", t, i).as_bytes()).unwrap();
                }
            });
        }
    });

    // each update bumps the version exactly once
    assert_eq!(
        engine.version(&key(0)).unwrap(),
        Some((threads * per_thread) as u16)
    );
    let value = String::from_utf8(engine.get(&key(0)).unwrap().unwrap()).unwrap();
    assert!(value.ends_with(&format!("-{}", per_thread - 1)));
}

#[test]
fn test_engine_readers_see_whole_values_during_updates() {
    let (_temp, engine) = setup_temp_engine();
    engine.set(&key(0), &[0u8; 200]).unwrap();

    thread::scope(|s| {
        let engine = &engine;
        s.spawn(move || {
            for i in 1..=2000u32 {
                let fill = (i % 256) as u8;
                let len = 100 + (i % 100) as usize;
                engine.set(&key(0), &vec![fill; len]).unwrap();
            }
        });
        for _ in 0..2 {
            s.spawn(move || {
                for _ in 0..2000 {
                    let value = engine.get(&key(0)).unwrap().unwrap();
                    assert!(value.iter().all(|&b| b == value[0]), "torn read");
                }
            });
        }
    });
}
