
use std::io::Cursor;

use evtxmap::{EventMap, EvtxCarver};
use fixtures::*;
use pretty_assertions::assert_eq;

#[test]
fn test_carves_chunk_embedded_in_raw_stream() {
    ensure_env_logger_initialized();

    let mut chunk_builder = ChunkBuilder::new();
    chunk_builder.add_standard_record(1, FILETIME_2017);
    chunk_builder.add_standard_record(2, FILETIME_2017);

    // No file header, no chunk alignment: a chunk buried in arbitrary bytes.
    let mut blob = vec![0xaa_u8; 1234];
    blob.extend_from_slice(&chunk_builder.finish());
    blob.extend_from_slice(&[0x55_u8; 321]);

    let mut carver = EvtxCarver::from_read_seek(Cursor::new(blob));
    assert_eq!(carver.scan_chunk_offsets(0).unwrap(), vec![1234]);

    let events: Vec<EventMap> = carver.events(0).unwrap().collect();
    let ids: Vec<i64> = events
        .iter()
        .map(|event| event.event_record_id().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(events[0].channel().unwrap(), "TestChannel");
}

#[test]
fn test_carver_skips_false_positives() {
    ensure_env_logger_initialized();

    // A chunk magic with garbage behind it, then a real chunk.
    let mut chunk_builder = ChunkBuilder::new();
    chunk_builder.add_standard_record(9, FILETIME_2017);

    let mut blob = Vec::new();
    blob.extend_from_slice(b"ElfChnk\x00");
    blob.extend_from_slice(&[0xff_u8; 256]);
    blob.extend_from_slice(&chunk_builder.finish());

    let mut carver = EvtxCarver::from_read_seek(Cursor::new(blob));
    let events: Vec<EventMap> = carver.events(0).unwrap().collect();
    let ids: Vec<i64> = events
        .iter()
        .map(|event| event.event_record_id().unwrap())
        .collect();
    assert_eq!(ids, vec![9]);
}

#[test]
fn test_carving_from_an_offset_ignores_earlier_chunks() {
    ensure_env_logger_initialized();

    let mut first = ChunkBuilder::new();
    first.add_standard_record(1, FILETIME_2017);
    let mut second = ChunkBuilder::new();
    second.add_standard_record(2, FILETIME_2017);

    let mut blob = first.finish();
    let second_offset = blob.len() as u64;
    blob.extend_from_slice(&second.finish());

    let mut carver = EvtxCarver::from_read_seek(Cursor::new(blob));
    let events: Vec<EventMap> = carver.events(second_offset).unwrap().collect();
    let ids: Vec<i64> = events
        .iter()
        .map(|event| event.event_record_id().unwrap())
        .collect();
    assert_eq!(ids, vec![2]);
}
