use std::io::Write;
use std::path::Path;

use tempfile::{NamedTempFile, TempDir};
use wis_forensics::export::sqlite;
use wis_forensics::{
    run, ContextRules, Encoding, EntityClass, EntityKey, PatternConfig, PatternSet, RecoveryError,
    RunOptions, SourceDescriptor, StopPolicy,
};

fn source_file(bytes: &[u8]) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

fn defaults() -> PatternSet {
    PatternConfig::default().compile().unwrap()
}

fn page_with(id: &str, page_size: usize) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    page[300..300 + id.len()].copy_from_slice(id.as_bytes());
    page
}

#[test]
fn hydraulic_valve_block_from_file() {
    let file = source_file(b"\x00\x00\x13...A123 456 78 90 Hydraulic valve block...\x00\x00");
    let result = run(
        &[SourceDescriptor::whole(file.path())],
        &defaults(),
        &RunOptions::default(),
    )
    .unwrap();
    assert_eq!(result.entities.len(), 1);
    let rec = &result.entities[&EntityKey::new("A123 456 78 90")];
    assert!(rec.description.contains("Hydraulic valve block"), "{}", rec.description);
    assert_eq!(rec.observation_count, 1);
}

#[test]
fn straddling_identifiers_counted_once_for_any_chunk_size() {
    let cfg = PatternConfig::builder()
        .identifier_patterns([
            r"[A-Z][0-9]{3} [0-9]{3} [0-9]{2} [0-9]{2}",
            r"[A-Z][0-9]{10}(?-u:\b)",
        ])
        .procedure_patterns(Vec::<String>::new())
        .bulletin_patterns(Vec::<String>::new())
        .max_match_len(14)
        .context_rules(ContextRules {
            before_bytes: 0,
            after_bytes: 16,
            ..Default::default()
        })
        .build()
        .unwrap();

    let ids = ["A001 890 38 67", "B3736111924", "N404 311 02 53", "W2220003311"];
    let mut blob = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        blob.extend(std::iter::repeat(0x01u8).take(7 + i * 5));
        blob.extend_from_slice(id.as_bytes());
        blob.extend_from_slice(b"\x00U1300\x00");
    }
    let file = source_file(&blob);

    let reference = run(&[SourceDescriptor::whole(file.path())], &cfg, &RunOptions::default()).unwrap();
    assert_eq!(reference.entities.len(), ids.len());

    for chunk in 15..=48 {
        let result = run(
            &[SourceDescriptor::chunked(file.path(), chunk)],
            &cfg,
            &RunOptions::default(),
        )
        .unwrap();
        let keys: Vec<_> = result.entities.keys().collect();
        let expected: Vec<_> = reference.entities.keys().collect();
        assert_eq!(keys, expected, "chunk {chunk}");
        for rec in result.entities.values() {
            assert_eq!(rec.observation_count, 1, "chunk {chunk}: {}", rec.key);
            assert_eq!(rec.description, reference.entities[&rec.key].description, "chunk {chunk}");
        }
        let models = result.stats.class(EntityClass::Model);
        assert_eq!(models.candidates, ids.len() as u64, "chunk {chunk}");
    }
}

#[test]
fn description_does_not_depend_on_chunk_boundaries() {
    let mut blob = vec![b'#'; 4000];
    blob.extend_from_slice(b" A123 456 78 90 Hydraulic valve block, complete ");
    blob.extend(vec![b'#'; 4000]);
    let file = source_file(&blob);
    let set = defaults();
    let key = EntityKey::new("A123 456 78 90");

    let reference = run(&[SourceDescriptor::whole(file.path())], &set, &RunOptions::default()).unwrap();
    assert_eq!(reference.entities[&key].description, "Hydraulic valve block, complete");

    let chunks = [64, 500, 813, 1000, 4096, 8192].into_iter().chain((4001..4070).step_by(3));
    for chunk in chunks {
        let result = run(
            &[SourceDescriptor::chunked(file.path(), chunk)],
            &set,
            &RunOptions::default(),
        )
        .unwrap();
        assert_eq!(result.entities.len(), 1, "chunk {chunk}");
        let rec = &result.entities[&key];
        assert_eq!(rec.observation_count, 1, "chunk {chunk}");
        assert_eq!(rec.description, "Hydraulic valve block, complete", "chunk {chunk}");
    }
}

#[test]
fn zero_padded_page_keeps_description() {
    let mut page = vec![0u8; 8192];
    let body = b"A123 456 78 90 Hydraulic valve block";
    page[1000..1000 + body.len()].copy_from_slice(body);
    page.extend(vec![0u8; 8192]);
    let file = source_file(&page);

    let result = run(
        &[SourceDescriptor::paged(file.path(), 8192)],
        &defaults(),
        &RunOptions::default(),
    )
    .unwrap();
    assert_eq!(result.stats.blank_windows, 1);
    let rec = &result.entities[&EntityKey::new("A123 456 78 90")];
    assert_eq!(rec.description, "Hydraulic valve block");
}

#[test]
fn unreadable_source_is_skipped() {
    let good = source_file(b"\x00A001 890 38 67 shaft seal ring\x00");
    let missing = good.path().with_extension("missing");
    let result = run(
        &[
            SourceDescriptor::whole(&missing),
            SourceDescriptor::whole(good.path()),
        ],
        &defaults(),
        &RunOptions::default(),
    )
    .unwrap();
    assert_eq!(result.entities.len(), 1);
    assert_eq!(result.stats.sources_attempted.len(), 2);
    assert_eq!(result.stats.sources_failed.len(), 1);
    assert!(result.stats.sources_failed[0].source.ends_with("missing"));
}

#[test]
fn all_sources_unreadable() {
    let dir = TempDir::new().unwrap();
    let sources = [
        SourceDescriptor::whole(dir.path().join("rfile000")),
        SourceDescriptor::paged(dir.path().join("rfile001"), 8192),
    ];
    match run(&sources, &defaults(), &RunOptions::default()) {
        Err(RecoveryError::NoReadableSource { attempted }) => {
            assert_eq!(attempted.len(), 2);
            assert!(attempted[0].ends_with("rfile000"));
        }
        other => panic!("unexpected: {:?}", other.map(|r| r.entities.len())),
    }
}

#[test]
fn paged_source_skips_blank_pages() {
    let mut blob = page_with("A001 890 38 67", 8192);
    blob.extend(vec![0u8; 8192]);
    blob.extend(page_with("B373.611.19.24", 8192));
    let file = source_file(&blob);

    let result = run(
        &[SourceDescriptor::paged(file.path(), 8192)],
        &defaults(),
        &RunOptions::default(),
    )
    .unwrap();
    assert_eq!(result.stats.windows, 3);
    assert_eq!(result.stats.blank_windows, 1);
    assert_eq!(result.stats.bytes_scanned, 3 * 8192);
    assert_eq!(result.entities.len(), 2);
}

#[test]
fn max_windows_caps_a_source() {
    let mut blob = page_with("A001 890 38 67", 4096);
    blob.extend(page_with("B373 611 19 24", 4096));
    let file = source_file(&blob);
    let result = run(
        &[SourceDescriptor::paged(file.path(), 4096).with_max_windows(1)],
        &defaults(),
        &RunOptions::default(),
    )
    .unwrap();
    assert_eq!(result.stats.windows, 1);
    assert_eq!(result.entities.len(), 1);
}

#[test]
fn stop_policy_ends_the_run() {
    let mut blob = Vec::new();
    for id in ["A001 890 38 67", "A002 890 38 67", "A003 890 38 67", "A004 890 38 67"] {
        blob.extend(page_with(id, 4096));
    }
    let file = source_file(&blob);
    let options = RunOptions {
        stop: StopPolicy {
            max_entities: Some(2),
            max_text: None,
        },
        ..Default::default()
    };
    let result = run(&[SourceDescriptor::paged(file.path(), 4096)], &defaults(), &options).unwrap();
    assert_eq!(result.entities.len(), 2);
    assert!(result.stats.stopped_early);
    assert!(result.stats.windows < 4);
}

#[test]
fn utf16_strings_are_recovered() {
    let text = "Replace the seal A001 890 38 67 on the hub.";
    let mut blob = vec![0u8; 11];
    for unit in text.encode_utf16() {
        blob.extend_from_slice(&unit.to_le_bytes());
    }
    blob.extend(vec![0u8; 16]);
    let file = source_file(&blob);

    let latin_only = run(
        &[SourceDescriptor::whole(file.path())],
        &defaults(),
        &RunOptions::default(),
    )
    .unwrap();
    assert!(latin_only.entities.is_empty());

    let set = PatternConfig::builder()
        .encodings(vec![Encoding::Latin1, Encoding::Utf16le])
        .build()
        .unwrap();
    let result = run(&[SourceDescriptor::whole(file.path())], &set, &RunOptions::default()).unwrap();
    assert!(result.entities.contains_key(&EntityKey::new("A001 890 38 67")));
    let procs: Vec<_> = result.procedures().collect();
    assert_eq!(procs.len(), 1);
    assert_eq!(procs[0].content, text);
}

#[test]
fn toml_patterns_change_validation() {
    let mut cfg_file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(cfg_file, "version = \"site/9\"\nidentifier_prefixes = \"A\"\n\n[text]\nmin_words = 3").unwrap();
    let config = PatternConfig::load(Some(cfg_file.path())).unwrap();
    assert_eq!(config.version, "site/9");
    assert_eq!(config.text.min_words, 3);
    let set = config.compile().unwrap();

    let file = source_file(b"\x00A001 890 38 67 seal\x00B373 611 19 24 valve\x00");
    let result = run(&[SourceDescriptor::whole(file.path())], &set, &RunOptions::default()).unwrap();
    assert_eq!(result.pattern_version, "site/9");
    assert_eq!(result.entities.len(), 1);
    assert_eq!(result.stats.class(EntityClass::Identifier).rejected, 1);
}

fn stored_description(path: &Path, key: &str) -> String {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row(
        "SELECT description FROM wis_parts WHERE part_number = ?1",
        [key],
        |r| r.get(0),
    )
    .unwrap()
}

#[test]
fn sqlite_export_keeps_best_description_across_runs() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("wis.sqlite");

    let rich = source_file(b"\x00\x00A001 890 38 67 Portal hub seal kit, complete\x00");
    let poor = source_file(b"\x00\x00A001 890 38 67\x00\x00\x00\x00\x00");
    let set = defaults();

    let first = run(&[SourceDescriptor::whole(rich.path())], &set, &RunOptions::default()).unwrap();
    assert_eq!(sqlite::write(&first, &db).unwrap().parts, 1);

    let second = run(&[SourceDescriptor::whole(poor.path())], &set, &RunOptions::default()).unwrap();
    assert_eq!(second.entities.values().next().unwrap().description, "");
    assert_eq!(sqlite::write(&second, &db).unwrap().parts, 0);

    let desc = stored_description(&db, "A001 890 38 67");
    assert!(desc.contains("Portal hub seal kit"), "{desc}");
}
