//! End-to-end tests: write bags, read them back, damage them, recover them

use bagkit_core::{
    ArrayLayout, ArrayMessage, BagError, BagOptions, BagReader, BagWriter, Compression, Dimension,
    Message, Query, Timestamp, TypeDescriptor,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("bagkit_core=debug")
        .try_init();
}

fn bag_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

/// 1000 steps, each writing to a string channel then an integer channel
fn write_scenario(path: &Path, options: BagOptions) {
    let mut writer = BagWriter::new(path, options);
    for i in 0..1000i64 {
        let ts = Timestamp::from_secs(i);
        writer
            .write("/chatter", &Message::from(format!("foo_{}", i)), ts)
            .unwrap();
        writer.write("/numbers", &Message::from(i), ts).unwrap();
    }
    writer.close().unwrap();
}

fn sample_messages() -> Vec<(&'static str, Message, Timestamp)> {
    let layout = ArrayLayout {
        dim: vec![Dimension::new("data", 3, 3)],
        data_offset: 0,
    };
    let mut messages = Vec::new();
    for i in 0..50i64 {
        let ts = Timestamp::new(i, (i as u32) * 1000);
        messages.push(("/chatter", Message::from(format!("foo_{}", i)), ts));
        messages.push((
            "/array",
            Message::from(ArrayMessage::new(
                layout.clone(),
                vec![i as f64, i as f64 + 0.5, -(i as f64)],
            )),
            ts,
        ));
        messages.push(("/flag", Message::from(i % 3 == 0), ts));
        messages.push(("/stamp", Message::from(Timestamp::new(i * 2, 7)), ts));
        messages.push((
            "/raw",
            Message::opaque(
                TypeDescriptor::new("custom/Blob", "uint8[] bytes"),
                vec![i as u8; (i as usize) % 7],
            ),
            ts,
        ));
    }
    messages
}

#[test]
fn test_roundtrip_every_compression() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let expected = sample_messages();

    for compression in [Compression::None, Compression::Bz2, Compression::Lz4] {
        let path = bag_path(&temp_dir, &format!("{}.bag", compression));
        let options = BagOptions::default()
            .with_compression(compression)
            .with_chunk_threshold(1024);

        let mut writer = BagWriter::new(&path, options);
        for (channel, message, ts) in &expected {
            writer.write(channel, message, *ts).unwrap();
        }
        writer.close().unwrap();

        let reader = BagReader::open(&path).unwrap();
        assert_eq!(reader.header().compression, compression);
        assert!(reader.chunks().len() > 1, "{}", compression);

        let read = reader.read_ordered(&Query::all()).unwrap();
        assert_eq!(read.len(), expected.len());

        // timestamps repeat across channels, so compare per channel
        for channel in ["/chatter", "/array", "/flag", "/stamp", "/raw"] {
            let want: Vec<&Message> = expected
                .iter()
                .filter(|(c, _, _)| *c == channel)
                .map(|(_, m, _)| m)
                .collect();
            let got: Vec<Message> = read
                .iter()
                .filter(|m| m.channel() == channel)
                .map(|m| m.decode().unwrap())
                .collect();
            assert_eq!(got.iter().collect::<Vec<_>>(), want, "{} {}", compression, channel);
        }
    }
}

#[test]
fn test_channel_keeps_its_type() {
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "types.bag");

    let mut writer = BagWriter::new(&path, BagOptions::default());
    writer
        .write("/numbers", &Message::from(1i64), Timestamp::from_secs(1))
        .unwrap();
    writer
        .write("/chatter", &Message::from("a"), Timestamp::from_secs(2))
        .unwrap();

    for (channel, message) in [("/numbers", Message::from("x")), ("/chatter", Message::from(2i64))] {
        let err = writer
            .write(channel, &message, Timestamp::from_secs(3))
            .unwrap_err();
        assert!(matches!(err, BagError::TypeConflict { .. }), "{}", err);
    }
    // same name, different width is still a different type
    assert!(writer
        .write("/numbers", &Message::from(1i32), Timestamp::from_secs(4))
        .is_err());
    writer.close().unwrap();

    let reader = BagReader::open(&path).unwrap();
    assert_eq!(reader.message_count(), 2);
    assert_eq!(reader.connections().len(), 2);
}

#[test]
fn test_time_ranges_match_brute_force() {
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "ranges.bag");
    let mut rng = StdRng::seed_from_u64(7);

    // shuffled timestamps with duplicates, spread over many chunks
    let mut times: Vec<i64> = (0..600).map(|i| i / 2).collect();
    times.shuffle(&mut rng);

    let options = BagOptions::default()
        .with_compression(Compression::Lz4)
        .with_chunk_threshold(512);
    let mut writer = BagWriter::new(&path, options);
    let mut written = Vec::new();
    for (i, sec) in times.iter().enumerate() {
        let channel = if i % 3 == 0 { "/a" } else { "/b" };
        let ts = Timestamp::new(*sec, (i % 5) as u32);
        writer.write(channel, &Message::from(i as u64), ts).unwrap();
        written.push((channel, i as u64, ts));
    }
    writer.close().unwrap();

    let reader = BagReader::open(&path).unwrap();
    for _ in 0..50 {
        let a = Timestamp::new(rng.gen_range(-10..310), rng.gen_range(0..5));
        let b = Timestamp::new(rng.gen_range(-10..310), rng.gen_range(0..5));
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        let channel = if rng.gen_bool(0.5) { "/a" } else { "/b" };

        let mut expected: Vec<(Timestamp, u64)> = written
            .iter()
            .filter(|(c, _, ts)| *c == channel && *ts >= start && *ts <= end)
            .map(|(_, v, ts)| (*ts, *v))
            .collect();
        expected.sort();

        let query = Query::all()
            .with_channels([channel])
            .with_time_range(start, end);

        let mut lazy: Vec<(Timestamp, u64)> = reader
            .read(&query)
            .map(|m| {
                let m = m.unwrap();
                (m.timestamp(), m.decode().unwrap().as_i64().unwrap() as u64)
            })
            .collect();
        lazy.sort();
        assert_eq!(lazy, expected);

        let ordered: Vec<Timestamp> = reader
            .read_ordered(&query)
            .unwrap()
            .iter()
            .map(|m| m.timestamp())
            .collect();
        assert!(ordered.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(ordered.len(), expected.len());
    }
}

#[test]
fn test_corrupt_chunk_does_not_affect_others() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "chunks.bag");
    write_scenario(
        &path,
        BagOptions::default()
            .with_compression(Compression::Bz2)
            .with_chunk_threshold(2048),
    );

    let reader = BagReader::open(&path).unwrap();
    let chunks: Vec<_> = reader.chunks().to_vec();
    assert!(chunks.len() >= 3);
    let victim = &chunks[1];

    let mut data = std::fs::read(&path).unwrap();
    let mid = victim.info.chunk_pos as usize + 40 + victim.info.compressed_size as usize / 2;
    data[mid] ^= 0x5A;

    let reader = BagReader::from_bytes(data).unwrap();
    let results: Vec<_> = reader.read(&Query::all()).collect();
    let errors: Vec<&BagError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        errors[0],
        BagError::ChunkCorrupt { pos, .. } if *pos == victim.info.chunk_pos
    ));

    let ok = results.iter().filter(|r| r.is_ok()).count() as u64;
    assert_eq!(ok, 2000 - victim.info.message_count());
}

#[test]
fn test_close_twice() {
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "close.bag");

    let mut writer = BagWriter::new(&path, BagOptions::default());
    writer
        .write("/chatter", &Message::from("once"), Timestamp::from_secs(1))
        .unwrap();
    writer.close().unwrap();
    let before = std::fs::read(&path).unwrap();

    assert!(matches!(writer.close(), Err(BagError::BagClosed)));
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(BagReader::open(&path).unwrap().message_count(), 1);
}

#[test]
fn test_crash_recovers_sealed_chunks() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "full.bag");
    write_scenario(
        &path,
        BagOptions::default()
            .with_compression(Compression::Lz4)
            .with_chunk_threshold(1024),
    );

    let full = std::fs::read(&path).unwrap();
    let chunks = BagReader::open(&path).unwrap().chunks().to_vec();
    assert!(chunks.len() > 4);

    for sealed in [1usize, 3] {
        // cut in the middle of the next chunk, as a crash during its write
        let cut = chunks[sealed].info.chunk_pos as usize + 25;
        let crashed = bag_path(&temp_dir, &format!("crash_{}.bag", sealed));
        std::fs::write(&crashed, &full[..cut]).unwrap();

        assert!(matches!(
            BagReader::open(&crashed),
            Err(BagError::IndexMissing(_))
        ));

        let reader = BagReader::open_recover(&crashed).unwrap();
        assert!(reader.is_recovered());
        assert_eq!(reader.chunks().len(), sealed);

        let expected: u64 = chunks[..sealed].iter().map(|c| c.info.message_count()).sum();
        let read: Vec<_> = reader
            .read(&Query::all())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(read.len() as u64, expected);
    }
}

#[test]
fn test_unclosed_writer_is_recoverable() {
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "live.bag");

    let mut writer = BagWriter::new(&path, BagOptions::default().with_chunk_threshold(256));
    for i in 0..30i64 {
        writer
            .write("/numbers", &Message::from(i), Timestamp::from_secs(i))
            .unwrap();
    }
    writer.flush().unwrap();

    // the file on disk while the writer is still open
    let snapshot = std::fs::read(&path).unwrap();
    let reader = BagReader::new_recover(std::io::Cursor::new(snapshot)).unwrap();
    assert_eq!(reader.message_count(), 30);

    writer.close().unwrap();
    assert_eq!(BagReader::open(&path).unwrap().message_count(), 30);
}

#[test]
fn test_append_to_closed_bag() {
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "append.bag");

    let mut writer = BagWriter::new(&path, BagOptions::default());
    writer
        .write("/chatter", &Message::from("first"), Timestamp::from_secs(1))
        .unwrap();
    writer.close().unwrap();

    let mut writer = BagWriter::append(&path, BagOptions::default().with_compression(Compression::Lz4)).unwrap();
    assert!(matches!(
        writer.write("/chatter", &Message::from(1i64), Timestamp::from_secs(2)),
        Err(BagError::TypeConflict { .. })
    ));
    writer
        .write("/chatter", &Message::from("second"), Timestamp::from_secs(2))
        .unwrap();
    writer
        .write("/numbers", &Message::from(3i64), Timestamp::from_secs(3))
        .unwrap();
    writer.close().unwrap();

    let reader = BagReader::open(&path).unwrap();
    assert_eq!(reader.connections().len(), 2);
    assert_eq!(reader.chunks().len(), 2);
    assert_eq!(reader.chunks()[0].info.compression, Compression::None);
    assert_eq!(reader.chunks()[1].info.compression, Compression::Lz4);

    let chatter: Vec<String> = reader
        .read(&Query::all().with_channels(["/chatter"]))
        .map(|m| m.unwrap().decode().unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(chatter, vec!["first", "second"]);
}

#[test]
fn test_append_to_crashed_bag() {
    let temp_dir = TempDir::new().unwrap();
    let full_path = bag_path(&temp_dir, "full.bag");
    write_scenario(&full_path, BagOptions::default().with_chunk_threshold(1024));

    let full = std::fs::read(&full_path).unwrap();
    let chunks = BagReader::open(&full_path).unwrap().chunks().to_vec();
    let kept: u64 = chunks[..2].iter().map(|c| c.info.message_count()).sum();

    let path = bag_path(&temp_dir, "crashed.bag");
    std::fs::write(&path, &full[..chunks[2].info.chunk_pos as usize + 10]).unwrap();

    let mut writer = BagWriter::append(&path, BagOptions::default()).unwrap();
    writer
        .write("/numbers", &Message::from(5000i64), Timestamp::from_secs(5000))
        .unwrap();
    writer.close().unwrap();

    let reader = BagReader::open(&path).unwrap();
    assert!(!reader.is_recovered());
    assert_eq!(reader.message_count(), kept + 1);
    let last = reader
        .read_ordered(&Query::all().with_start_time(Timestamp::from_secs(4000)))
        .unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].decode().unwrap().as_i64(), Some(5000));
}

#[test]
fn test_chatter_numbers_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let path = bag_path(&temp_dir, "scenario.bag");
    write_scenario(&path, BagOptions::default().with_chunk_threshold(4096));

    let reader = BagReader::open(&path).unwrap();
    let numbers: Vec<(Timestamp, i64)> = reader
        .read_ordered(&Query::all().with_channels(["/numbers"]))
        .unwrap()
        .iter()
        .map(|m| (m.timestamp(), m.decode().unwrap().as_i64().unwrap()))
        .collect();
    let expected: Vec<(Timestamp, i64)> = (0..1000).map(|i| (Timestamp::from_secs(i), i)).collect();
    assert_eq!(numbers.len(), 1000);
    assert_eq!(numbers, expected);

    // the lazy reader is ordered within each chunk, and chunks are written in time order here
    let lazy: Vec<i64> = reader
        .read(&Query::all().with_channels(["/numbers"]))
        .map(|m| m.unwrap().decode().unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(lazy, (0..1000).collect::<Vec<_>>());

    let info = reader.info();
    assert_eq!(info.message_count, 2000);
    assert_eq!(info.channel("/chatter").unwrap().message_count, 1000);
    assert_eq!(info.channel("/chatter").unwrap().type_name, "std_msgs/String");
    assert_eq!(info.start_time, Some(Timestamp::from_secs(0)));
    assert_eq!(info.end_time, Some(Timestamp::from_secs(999)));

    let first = reader
        .read(&Query::all().with_types(["std_msgs/String"]))
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(first.decode().unwrap().as_str(), Some("foo_0"));
}
