//! Integration tests for the ingest-side pipeline: filter → segment →
//! rotation → archive, against a real temp directory.

use chrono::Utc;
use nmea_relay::archive::Archiver;
use nmea_relay::filter::SentenceFilter;
use nmea_relay::segment::SegmentWriter;
use std::fs::File;
use std::io::Read;

const SENTENCES: &[&str] = &[
    "$GPGGA,103045,4530.5000,N,01512.0000,E,1,08,0.9,12.1,M,,M,,*47",
    "$RATTM,01,2.5,045.0,T,3.1,100.0,T,,,N,target,T,,,A*42",
    "$GPGGA,103046,4530.5010,N,01512.0010,E,1,08,0.9,12.1,M,,M,,*48",
];

#[test]
fn rotation_hands_exactly_one_segment_to_the_archiver() {
    let root = tempfile::tempdir().unwrap();
    let filter = SentenceFilter::new(false, vec!["GGA".into(), "TTM".into()]);

    // Threshold below two stamped lines: the second write rotates.
    let mut writer = SegmentWriter::create(root.path(), "mux", "dat", 100).unwrap();
    let archiver = Archiver::new(root.path()).unwrap();

    let mut closed = Vec::new();
    for sentence in SENTENCES {
        let stamped = filter.apply(sentence, Utc::now()).unwrap();
        if let Some(segment) = writer.append(&stamped).unwrap() {
            closed.push(segment);
        }
    }

    assert_eq!(closed.len(), 1, "exactly one rotation expected");
    let segment = &closed[0];
    assert_eq!(
        segment.bytes,
        std::fs::metadata(&segment.path).unwrap().len()
    );
    // The channel keeps writing into a fresh segment after rotation.
    assert!(writer.path().exists());
    assert!(writer.bytes() > 0);

    let entry = archiver.archive(segment).unwrap();
    assert!(!segment.path.exists());
    assert!(entry.zip_path.exists());
}

#[test]
fn archived_zip_reproduces_segment_byte_for_byte() {
    let root = tempfile::tempdir().unwrap();
    let filter = SentenceFilter::new(true, Vec::new());
    let mut writer = SegmentWriter::create(root.path(), "gps0", "dat", 64).unwrap();
    let archiver = Archiver::new(root.path()).unwrap();

    let mut expected = String::new();
    let mut segment = None;
    for sentence in SENTENCES {
        let stamped = filter.apply(sentence, Utc::now()).unwrap();
        expected.push_str(&stamped);
        expected.push('\n');
        if let Some(closed) = writer.append(&stamped).unwrap() {
            segment = Some(closed);
            break;
        }
    }
    let segment = segment.expect("threshold must have been crossed");
    let inner_name = segment
        .path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();

    let entry = archiver.archive(&segment).unwrap();

    let mut zip = zip::ZipArchive::new(File::open(&entry.zip_path).unwrap()).unwrap();
    let mut restored = String::new();
    zip.by_name(&inner_name)
        .unwrap()
        .read_to_string(&mut restored)
        .unwrap();
    assert_eq!(restored, expected);
}

#[test]
fn stray_sweep_runs_clean_on_empty_root() {
    let root = tempfile::tempdir().unwrap();
    let archiver = Archiver::new(root.path()).unwrap();
    assert_eq!(archiver.sweep_strays(root.path(), "dat").unwrap(), 0);
}
