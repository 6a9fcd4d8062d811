
use std::io::Cursor;

use chrono::{DateTime, Utc};
use evtxmap::{
    DeserializationError, EventMap, EvtxChunk, EvtxError, EvtxFile, ParserSettings,
};
use fixtures::*;
use pretty_assertions::assert_eq;

fn open(image: Vec<u8>) -> EvtxFile<Cursor<Vec<u8>>> {
    EvtxFile::from_read_seek(Cursor::new(image)).unwrap()
}

fn record_ids(events: &[EventMap]) -> Vec<i64> {
    events
        .iter()
        .map(|event| event.event_record_id().unwrap())
        .collect()
}

#[test]
fn test_empty_file_yields_no_events() {
    ensure_env_logger_initialized();
    let file = open(build_file(&[], 1));
    assert_eq!(file.header().chunk_count, 0);
    assert_eq!(file.events().count(), 0);
    assert_eq!(file.fast_events().count(), 0);
    drop(file);
}

#[test]
fn test_rejects_non_evtx_input() {
    let err = EvtxFile::from_read_seek(Cursor::new(b"MZ\x90\x00 not an event log".to_vec()));
    assert!(matches!(
        err,
        Err(EvtxError::Deserialization(
            DeserializationError::InvalidEvtxFileHeaderMagic { .. }
        ))
    ));
}

#[test]
fn test_standard_record_materializes_expected_map() {
    ensure_env_logger_initialized();
    let file = open(standard_file(&[1]));
    let events: Vec<EventMap> = file.events().collect();
    assert_eq!(events.len(), 1);
    let event = &events[0];

    // Substitutions spliced into the template
    assert_eq!(
        event.get_string("/Event/EventData/Data1/Value").unwrap(),
        "SystemRoot"
    );
    assert_eq!(event.get_int("/Event/EventData/Data/Value").unwrap(), 4);
    assert_eq!(
        event.get_string("/Event/EventData/Data/Type").unwrap(),
        "winreg"
    );

    // Canonical accessors
    assert_eq!(event.event_id().unwrap(), 4001);
    assert_eq!(event.channel().unwrap(), "TestChannel");
    assert_eq!(event.event_record_id().unwrap(), 1);
    assert_eq!(event.user_id(), Some("S-1-5-18"));
    assert_eq!(
        event.time_created().unwrap(),
        DateTime::parse_from_rfc3339("2017-01-19T16:07:20.5Z")
            .unwrap()
            .with_timezone(&Utc)
    );

    // Literal attribute values survive as a nested map
    assert_eq!(
        event.get_string("/Event/System/Provider/Name").unwrap(),
        "TestProvider"
    );
    assert_eq!(
        event
            .get_string("/Event/System/EventID/Qualifiers")
            .unwrap(),
        "16384"
    );

    // The xmlns attribute never reaches consumers
    assert!(event.get("/Event/xmlns").is_err());
}

#[test]
fn test_template_reuse_materializes_identical_maps() {
    ensure_env_logger_initialized();

    // Two records sharing one template definition with identical substitution
    // arrays; the second record references the definition by offset.
    let mut builder = ChunkBuilder::new();
    let mut definition_offset = 0_u32;
    builder.add_record(1, FILETIME_2017, |buf| {
        emit_fragment_header(buf);
        definition_offset = emit_template_instance_inline(
            buf,
            emit_standard_template_elements,
            &standard_substitutions(7, FILETIME_2017),
        );
    });
    builder.add_record(2, FILETIME_2017, |buf| {
        emit_fragment_header(buf);
        emit_template_instance_ref(buf, definition_offset, &standard_substitutions(7, FILETIME_2017));
    });

    let file = open(build_file(&[builder.finish()], 3));
    let events: Vec<EventMap> = file.events().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], events[1]);
}

#[test]
fn test_cached_template_skip_matches_direct_parse() {
    ensure_env_logger_initialized();

    // `add_standard_record` registers the inlined definition in the template
    // table, so the first record exercises the cached-definition skip and the
    // second the plain cache hit.
    let file = open(standard_file(&[1, 2]));
    let events: Vec<EventMap> = file.events().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0].get_string("/Event/EventData/Data1/Value").unwrap(),
        "SystemRoot"
    );
    assert_eq!(record_ids(&events), vec![1, 2]);
}

#[test]
fn test_ordered_iteration_is_ascending_and_multisets_agree() {
    ensure_env_logger_initialized();

    let mut newer = ChunkBuilder::new();
    newer.add_standard_record(3, FILETIME_2017);
    newer.add_standard_record(4, FILETIME_2017);

    let mut older = ChunkBuilder::new();
    older.add_standard_record(1, FILETIME_2017);
    older.add_standard_record(2, FILETIME_2017);

    // Chunks are laid out newest-first, as on disk.
    let image = build_file(&[newer.finish(), older.finish()], 5);

    let file = open(image);
    let slow: Vec<EventMap> = file.events().collect();
    assert_eq!(record_ids(&slow), vec![1, 2, 3, 4]);

    let fast: Vec<EventMap> = file.fast_events().collect();
    assert_eq!(record_ids(&fast), vec![1, 2, 3, 4]);

    let mut unordered_ids = record_ids(&file.unordered_events().collect::<Vec<_>>());
    unordered_ids.sort_unstable();
    assert_eq!(unordered_ids, vec![1, 2, 3, 4]);

    assert_eq!(slow, fast);
}

#[test]
fn test_corrupted_chunk_is_rejected_and_skipped() {
    ensure_env_logger_initialized();

    let mut bad_builder = ChunkBuilder::new();
    bad_builder.add_standard_record(1, FILETIME_2017);
    let mut bad = bad_builder.finish();
    // offset_last_record beyond the chunk
    bad[0x2c..0x30].copy_from_slice(&0x10000_i32.to_le_bytes());

    let mut good_builder = ChunkBuilder::new();
    good_builder.add_standard_record(3, FILETIME_2017);
    good_builder.add_standard_record(4, FILETIME_2017);
    let good = good_builder.finish();

    // Direct load reports the bad size.
    assert!(matches!(
        EvtxChunk::parse(0, bad.clone(), &ParserSettings::default()),
        Err(DeserializationError::InvalidLastRecordOffset { .. })
    ));

    // Iteration skips the chunk and proceeds with the next valid one, in
    // strict and in carving mode alike.
    let image = build_file(&[bad, good], 5);
    let file = open(image.clone());
    assert_eq!(record_ids(&file.events().collect::<Vec<_>>()), vec![3, 4]);

    let carving = open(image).with_settings(ParserSettings::default().carve_mode(true));
    assert_eq!(record_ids(&carving.events().collect::<Vec<_>>()), vec![3, 4]);
}

#[test]
fn test_damaged_record_header_slides_in_carving_mode() {
    ensure_env_logger_initialized();

    let mut builder = ChunkBuilder::new();
    builder.add_standard_record(1, FILETIME_2017);
    builder.add_standard_record(2, FILETIME_2017);
    builder.add_standard_record(3, FILETIME_2017);
    let second_record = builder.record_offset(1);
    let mut chunk = builder.finish();
    chunk[second_record] = 0x00; // break the record magic

    // Strict mode stops walking the event frames at the damage.
    let strict = open(build_file(&[chunk.clone()], 4));
    assert_eq!(strict.events().count(), 0);

    // The one-byte slide recovers every frame behind the damage.
    let carving = open(build_file(&[chunk], 4))
        .with_settings(ParserSettings::default().carve_mode(true));
    assert_eq!(record_ids(&carving.events().collect::<Vec<_>>()), vec![1, 3]);
}

#[test]
fn test_damaged_record_payload_drops_only_that_record() {
    ensure_env_logger_initialized();

    let mut builder = ChunkBuilder::new();
    builder.add_standard_record(1, FILETIME_2017);
    builder.add_standard_record(2, FILETIME_2017);
    builder.add_standard_record(3, FILETIME_2017);
    let second_record = builder.record_offset(1);
    let mut chunk = builder.finish();
    chunk[second_record + 24] = 0xee; // break the fragment header token

    for carve in [false, true] {
        let file = open(build_file(&[chunk.clone()], 4))
            .with_settings(ParserSettings::default().carve_mode(carve));
        assert_eq!(record_ids(&file.events().collect::<Vec<_>>()), vec![1, 3]);
    }
}

#[test]
fn test_time_window_filtering() {
    ensure_env_logger_initialized();

    let file = open(standard_file(&[1, 2, 3]));
    let events: Vec<EventMap> = file.events().collect();

    let start = DateTime::parse_from_rfc3339("2017-01-19T17:07:20+01:00")
        .unwrap()
        .with_timezone(&Utc);
    let stop = DateTime::parse_from_rfc3339("2017-01-19T17:07:21+01:00")
        .unwrap()
        .with_timezone(&Utc);

    let inside: Vec<&EventMap> = events
        .iter()
        .filter(|event| event.between(start, stop))
        .collect();
    assert_eq!(inside.len(), 3);
    assert!(inside
        .iter()
        .all(|event| { event.time_created().unwrap() >= start && event.time_created().unwrap() <= stop }));

    let later = DateTime::parse_from_rfc3339("2018-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    assert!(events.iter().all(|event| event.before(later)));
    assert!(!events.iter().any(|event| event.after(later)));
}

#[test]
fn test_chunk_checksum_validation() {
    ensure_env_logger_initialized();

    let mut builder = ChunkBuilder::new();
    builder.add_standard_record(1, FILETIME_2017);
    let chunk = builder.finish();

    let settings = ParserSettings::default().validate_checksums(true);
    assert!(EvtxChunk::parse(0, chunk.clone(), &settings).is_ok());

    let mut tampered = chunk;
    tampered[600] ^= 0xff;
    assert!(matches!(
        EvtxChunk::parse(0, tampered, &settings),
        Err(DeserializationError::InvalidChunkChecksum { .. })
    ));
}

#[test]
fn test_event_json_shape() {
    ensure_env_logger_initialized();

    let file = open(standard_file(&[1]));
    let events: Vec<EventMap> = file.events().collect();
    let json = events[0].to_json_value();

    assert_eq!(
        json["Event"]["System"]["Channel"],
        serde_json::json!("TestChannel")
    );
    assert_eq!(
        json["Event"]["System"]["TimeCreated"]["SystemTime"],
        serde_json::json!("2017-01-19T16:07:20.500000000Z")
    );
    assert_eq!(json["Event"]["EventData"]["Data1"]["Value"], serde_json::json!("SystemRoot"));
    assert!(json["Event"]["xmlns"].is_null());
}

#[test]
fn test_null_substitution_is_omitted() {
    ensure_env_logger_initialized();

    // <Data Name="Optional">%0%</Data> with a null value: the attribute side
    // keeps the name, the content contributes nothing.
    let mut builder = ChunkBuilder::new();
    builder.add_record(1, FILETIME_2017, |buf| {
        emit_fragment_header(buf);
        emit_template_instance_inline(
            buf,
            |b| {
                emit_open_element(b, "Event", false, true);
                emit_close_start(b);
                emit_open_element(b, "EventData", false, true);
                emit_close_start(b);
                emit_open_element(b, "Data", true, true);
                emit_attribute(b, "Name", true, |b| emit_value_text(b, "Optional"));
                emit_close_start(b);
                emit_substitution(b, 0, 0x00);
                emit_end_element(b);
                emit_end_element(b);
                emit_end_element(b);
            },
            &[SubValue::Null(4)],
        );
    });

    let file = open(build_file(&[builder.finish()], 2));
    let events: Vec<EventMap> = file.events().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].get_string("/Event/EventData/Optional").unwrap(),
        ""
    );
}
