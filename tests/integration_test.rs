use std::fs;
use std::path::{Path, PathBuf};

use arfx::container::{Container, ContainerOptions, NewChannel, OpenMode};
use arfx::compression::Compression;
use arfx::data::{AttrValue, Attributes, DataType, Payload, SampledData, Timestamp};
use arfx::formats::{Capabilities, FormatDescriptor, FormatPlugin, FormatRegistry, IoMode, FORMAT_API_VERSION};
use arfx::ops::{Dispatcher, Operation, Options, PCM_CHANNEL};
use arfx::{ArfxError, Result};
use tempfile::tempdir;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn s(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn run(opts: Options, op: Operation, arf: &Path, items: &[String]) -> arfx::Report {
    Dispatcher::new(FormatRegistry::builtin().unwrap(), opts)
        .run(op, arf, items)
        .unwrap()
}

fn ramp(n: usize, step: i16) -> Vec<i16> {
    (0..n).map(|i| (i as i16).wrapping_mul(step)).collect()
}

fn write_pcm(path: &Path, samples: &[i16]) {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    fs::write(path, bytes).unwrap();
}

fn write_wav(path: &Path, samples: &[i16], rate: f64) {
    let mut attrs = Attributes::new();
    attrs.insert("sampling_rate".into(), AttrValue::Float(rate));
    let reg = FormatRegistry::builtin().unwrap();
    let mut f = reg.open(path, IoMode::Write, &attrs).unwrap();
    f.plugin.write(&SampledData::from_i16(samples, 1).unwrap()).unwrap();
    f.close().unwrap();
}

fn read_external(path: &Path) -> (Vec<i16>, f64) {
    let reg = FormatRegistry::builtin().unwrap();
    let mut f = reg.open(path, IoMode::Read, &Attributes::new()).unwrap();
    let data = f.plugin.read().unwrap().unwrap();
    let rate = f.plugin.sampling_rate();
    f.close().unwrap();
    (data.to_i16_vec().unwrap(), rate)
}

fn entry_names(arf: &Path) -> Vec<String> {
    Container::open(arf, OpenMode::Read).unwrap().entry_names()
}

fn pcm_frames(arf: &Path, entry: &str) -> Vec<i16> {
    let mut c = Container::open(arf, OpenMode::Read).unwrap();
    match c.read_channel(entry, PCM_CHANNEL).unwrap() {
        Payload::Sampled(d) => d.to_i16_vec().unwrap(),
        Payload::Events(_)  => panic!("expected sampled data"),
    }
}

// ── Create / extract ─────────────────────────────────────────────────────────

#[test]
fn create_then_extract_round_trips_samples_and_rates() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.wav");
    let b = dir.path().join("b.wav");
    write_wav(&a, &ramp(5000, 7), 20000.0);
    write_wav(&b, &ramp(3001, -3), 44100.0);
    let arf = dir.path().join("song.arf");

    let report = run(Options::default(), Operation::Create, &arf, &[s(&a), s(&b)]);
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.succeeded, 2);
    assert_eq!(entry_names(&arf), vec!["a", "b"]);

    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    let opts = Options { output_dir: out.clone(), ..Options::default() };
    let report = run(opts, Operation::Extract, &arf, &[]);
    assert!(report.is_success(), "{:?}", report.failures);

    assert_eq!(read_external(&out.join("a_pcm.wav")), (ramp(5000, 7), 20000.0));
    assert_eq!(read_external(&out.join("b_pcm.wav")), (ramp(3001, -3), 44100.0));
}

#[test]
fn extract_sets_file_time_from_entry() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("x.pcm");
    write_pcm(&src, &ramp(100, 1));
    let arf = dir.path().join("t.arf");

    let mut opts = Options::default();
    opts.metadata.timestamp = Some(Timestamp::new(1_234_567_890, 0));
    run(opts, Operation::Create, &arf, &[s(&src)]);

    let opts = Options {
        output_dir: dir.path().to_owned(),
        name: Some("{entry}.pcm".into()),
        ..Options::default()
    };
    run(opts, Operation::Extract, &arf, &[]);
    let mtime = fs::metadata(dir.path().join("x.pcm")).unwrap().modified().unwrap();
    assert_eq!(Timestamp::from(mtime).seconds, 1_234_567_890);
}

#[test]
fn shared_base_name_yields_sequential_entries() {
    let dir = tempdir().unwrap();
    let files: Vec<String> = (0..4)
        .map(|i| {
            let p = dir.path().join(format!("in{i}.pcm"));
            write_pcm(&p, &ramp(10 + i, 1));
            s(&p)
        })
        .collect();
    let arf = dir.path().join("seq.arf");

    let opts = Options { name: Some("trial".into()), ..Options::default() };
    let report = run(opts, Operation::Create, &arf, &files);
    assert!(report.is_success());
    assert_eq!(entry_names(&arf), vec!["trial.0", "trial.1", "trial.2", "trial.3"]);
    assert_eq!(pcm_frames(&arf, "trial.2"), ramp(12, 1));

    // Appending continues the sequence.
    let extra = dir.path().join("extra.pcm");
    write_pcm(&extra, &ramp(5, 1));
    let opts = Options { name: Some("trial".into()), ..Options::default() };
    run(opts, Operation::Append, &arf, &[s(&extra)]);
    assert_eq!(entry_names(&arf).last().unwrap(), "trial.4");
}

#[test]
fn list_is_idempotent() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.pcm");
    write_pcm(&src, &ramp(64, 2));
    let arf = dir.path().join("l.arf");
    run(Options::default(), Operation::Create, &arf, &[s(&src)]);

    let first = run(Options::default(), Operation::List, &arf, &[]).output;
    let second = run(Options::default(), Operation::List, &arf, &[]).output;
    assert_eq!(first, vec!["/a/pcm"]);
    assert_eq!(first, second);

    let verbose = Options { verbose: true, ..Options::default() };
    let detail = run(verbose.clone(), Operation::List, &arf, &[]).output;
    assert_eq!(detail, run(verbose, Operation::List, &arf, &[]).output);
    assert!(detail.iter().any(|l| l.contains("64 frames")));
}

// ── Delete / repack ──────────────────────────────────────────────────────────

fn three_entries(dir: &Path) -> PathBuf {
    let files: Vec<String> = ["x", "y", "z"]
        .iter()
        .map(|n| {
            let p = dir.join(format!("{n}.pcm"));
            write_pcm(&p, &ramp(20_000, 13));
            s(&p)
        })
        .collect();
    let arf = dir.join("d.arf");
    let opts = Options { compression: Compression::NONE, ..Options::default() };
    run(opts, Operation::Create, &arf, &files);
    arf
}

#[test]
fn delete_with_repack_reclaims_space() {
    let dir = tempdir().unwrap();
    let arf = three_entries(dir.path());
    let before = fs::metadata(&arf).unwrap().len();

    let report = run(Options::default(), Operation::Delete, &arf, &["y".into()]);
    assert!(report.is_success());
    assert_eq!(entry_names(&arf), vec!["x", "z"]);
    assert!(fs::metadata(&arf).unwrap().len() < before);
    assert_eq!(pcm_frames(&arf, "z"), ramp(20_000, 13));
}

#[test]
fn delete_without_repack_hides_entry_but_keeps_space() {
    let dir = tempdir().unwrap();
    let arf = three_entries(dir.path());
    let before = fs::metadata(&arf).unwrap().len();

    let opts = Options { repack: false, ..Options::default() };
    let report = run(opts, Operation::Delete, &arf, &["y".into(), "nope".into()]);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.kind(), "NoSuchEntry");

    assert_eq!(entry_names(&arf), vec!["x", "z"]);
    // The deleted samples are still on disk; only a fresh index was appended.
    let after = fs::metadata(&arf).unwrap().len();
    assert!(after >= before);
    assert!(after - before < 4096, "{before} -> {after}");
    let listing = run(Options::default(), Operation::List, &arf, &[]).output;
    assert!(!listing.iter().any(|l| l.starts_with("/y")));
}

// ── Naming template ──────────────────────────────────────────────────────────

#[test]
fn template_uses_channel_index_and_entry_attrs() {
    let dir = tempdir().unwrap();
    let arf = dir.path().join("t.arf");
    {
        let mut c = Container::create(&arf, ContainerOptions::default()).unwrap();
        let mut attrs = Attributes::new();
        attrs.insert("bird".into(), AttrValue::Text("C194".into()));
        let chans = (0..3)
            .map(|i| NewChannel::sampled(&format!("ch{i}"), DataType::EXTRAC_HP, 8000.0,
                SampledData::from_i16(&ramp(16, i + 1), 1).unwrap()))
            .chain(std::iter::once(NewChannel::events("spikes", DataType::SPIKET, "s", vec![0.1])))
            .collect();
        c.create_entry("site_3", Timestamp::now(), attrs, chans).unwrap();
        c.close().unwrap();
    }

    let opts = Options {
        output_dir: dir.path().to_owned(),
        name: Some("{entry}_{channel}_{bird}.wav".into()),
        ..Options::default()
    };
    let report = run(opts, Operation::Extract, &arf, &[]);
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.succeeded, 3);
    assert_eq!(read_external(&dir.path().join("site_3_2_C194.wav")).0, ramp(16, 3));
    assert!(!dir.path().join("site_3_3_C194.wav").exists());

    let opts = Options {
        output_dir: dir.path().to_owned(),
        name: Some("{entry}_{animal}.wav".into()),
        ..Options::default()
    };
    let report = run(opts, Operation::Extract, &arf, &[]);
    assert_eq!(report.failures.len(), 3);
    assert_eq!(report.failures[0].error.kind(), "TemplateResolutionError");
}

#[test]
fn extract_never_overwrites_its_own_output() {
    let dir = tempdir().unwrap();
    let arf = dir.path().join("same.arf");
    {
        let mut c = Container::create(&arf, ContainerOptions::default()).unwrap();
        for (name, secs, step) in [("a", 100, 1), ("b", 200, 2)] {
            c.create_entry(name, Timestamp::new(secs, 0), Attributes::new(), vec![
                NewChannel::sampled(PCM_CHANNEL, DataType::ACOUSTIC, 20000.0,
                    SampledData::from_i16(&ramp(5, step), 1).unwrap()),
            ]).unwrap();
        }
        c.close().unwrap();
    }

    let opts = Options {
        output_dir: dir.path().to_owned(),
        name: Some("{channel_name}.pcm".into()),
        ..Options::default()
    };
    let report = run(opts, Operation::Extract, &arf, &[]);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, "/b/pcm");
    assert_eq!(report.failures[0].error.kind(), "NameConflict");
    assert_eq!(read_external(&dir.path().join("pcm.pcm")).0, ramp(5, 1));
}

// ── Metadata ─────────────────────────────────────────────────────────────────

#[test]
fn cli_attributes_land_on_new_entries_only() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.pcm");
    let b = dir.path().join("b.pcm");
    let c = dir.path().join("c.pcm");
    for p in [&a, &b, &c] {
        write_pcm(p, &ramp(8, 1));
    }
    let arf = dir.path().join("m.arf");

    let mut opts = Options::default();
    for (k, v) in [("experimenter", "smm3rc"), ("pen", "1")] {
        opts.metadata.entry_attrs.insert(k.into(), AttrValue::Text(v.into()));
    }
    opts.metadata.datatype = DataType::EXTRAC_HP;
    run(opts, Operation::Create, &arf, &[s(&a), s(&b)]);
    run(Options::default(), Operation::Append, &arf, &[s(&c)]);

    let container = Container::open(&arf, OpenMode::Read).unwrap();
    for name in ["a", "b"] {
        let entry = container.entry(name).unwrap();
        assert_eq!(entry.attrs["experimenter"], AttrValue::Text("smm3rc".into()));
        assert_eq!(entry.attrs["pen"], AttrValue::Text("1".into()));
        let channel = entry.channel(PCM_CHANNEL).unwrap();
        assert_eq!(channel.datatype, DataType::EXTRAC_HP);
        assert!(!channel.attrs.contains_key("pen"));
        assert_eq!(channel.attrs["source_file"], AttrValue::Text(s(if name == "a" { &a } else { &b })));
    }
    assert!(container.entry("c").unwrap().attrs.is_empty());
    assert!(container.attrs().is_empty());
}

// ── Failure handling ─────────────────────────────────────────────────────────

#[test]
fn unsupported_format_is_skipped() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("good.pcm");
    write_pcm(&good, &ramp(8, 1));
    let notes = dir.path().join("notes.txt");
    fs::write(&notes, "hello").unwrap();
    let arf = dir.path().join("u.arf");

    let report = run(Options::default(), Operation::Create, &arf, &[s(&notes), s(&good)]);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.kind(), "UnsupportedFormat");
    assert_eq!(entry_names(&arf), vec!["good"]);
}

#[test]
fn missing_container_is_fatal() {
    let dir = tempdir().unwrap();
    let err = Dispatcher::new(FormatRegistry::builtin().unwrap(), Options::default())
        .run(Operation::List, &dir.path().join("missing.arf"), &[])
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");

    let src = dir.path().join("a.pcm");
    write_pcm(&src, &ramp(4, 1));
    let err = Dispatcher::new(FormatRegistry::builtin().unwrap(), Options::default())
        .run(Operation::Append, &dir.path().join("missing.arf"), &[s(&src)])
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}

#[test]
fn append_to_existing_entry_checks_consistency() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("a.pcm");
    write_pcm(&src, &ramp(10, 1));
    let arf = dir.path().join("r.arf");
    run(Options::default(), Operation::Create, &arf, &[s(&src)]);

    let mut fast = Options::default();
    fast.plugin_attrs.insert("sampling_rate".into(), AttrValue::Float(10_000.0));
    let report = run(fast, Operation::Append, &arf, &[s(&src)]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.kind(), "TypeMismatch");
    assert_eq!(pcm_frames(&arf, "a").len(), 10);

    let report = run(Options::default(), Operation::Append, &arf, &[s(&src)]);
    assert!(report.is_success());
    assert_eq!(pcm_frames(&arf, "a").len(), 20);
    assert_eq!(entry_names(&arf), vec!["a"]);
}

#[test]
fn create_refuses_duplicate_names() {
    let dir = tempdir().unwrap();
    let d1 = dir.path().join("one");
    let d2 = dir.path().join("two");
    fs::create_dir(&d1).unwrap();
    fs::create_dir(&d2).unwrap();
    write_pcm(&d1.join("a.pcm"), &ramp(4, 1));
    write_pcm(&d2.join("a.pcm"), &ramp(4, 1));
    let arf = dir.path().join("dup.arf");

    // Both files share the stem, so they are numbered rather than colliding.
    let report = run(Options::default(), Operation::Create, &arf,
                     &[s(&d1.join("a.pcm")), s(&d2.join("a.pcm"))]);
    assert!(report.is_success());
    assert_eq!(entry_names(&arf), vec!["a.0", "a.1"]);
}

#[test]
fn stem_matching_a_numbered_name_is_still_ingested() {
    let dir = tempdir().unwrap();
    let d1 = dir.path().join("one");
    let d2 = dir.path().join("two");
    fs::create_dir(&d1).unwrap();
    fs::create_dir(&d2).unwrap();
    write_pcm(&d1.join("a.pcm"), &ramp(4, 1));
    write_pcm(&d2.join("a.pcm"), &ramp(4, 2));
    write_pcm(&dir.path().join("a.0.pcm"), &ramp(4, 3));
    let arf = dir.path().join("clash.arf");

    let items = [s(&d1.join("a.pcm")), s(&d2.join("a.pcm")), s(&dir.path().join("a.0.pcm"))];
    let report = run(Options::default(), Operation::Create, &arf, &items);
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.succeeded, 3);
    assert_eq!(entry_names(&arf), vec!["a.0", "a.1", "a.0.0"]);
    assert_eq!(pcm_frames(&arf, "a.0.0"), ramp(4, 3));
}

// ── Multi-entry plugin ───────────────────────────────────────────────────────

/// One entry per line, comma-separated i16 samples.
struct Lines {
    entries:  Vec<Vec<i16>>,
    active:   usize,
    consumed: bool,
}

impl FormatPlugin for Lines {
    fn read(&mut self) -> Result<Option<SampledData>> {
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        Ok(Some(SampledData::from_i16(&self.entries[self.active], 1)?))
    }

    fn write(&mut self, _: &SampledData) -> Result<()> {
        Err(ArfxError::WrongMode { mode: "read" })
    }

    fn timestamp(&self) -> Option<Timestamp> {
        Some(Timestamp::new(1_600_000_000 + self.active as i64, 0))
    }

    fn sampling_rate(&self) -> f64 { 1000.0 }

    fn nentries(&self) -> usize { self.entries.len() }

    fn set_entry(&mut self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            return Err(ArfxError::InvalidArgument(format!("no entry {index}")));
        }
        self.active = index;
        self.consumed = false;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> { Ok(()) }
}

fn open_lines(path: &Path, mode: IoMode, _: &Attributes) -> Result<Box<dyn FormatPlugin>> {
    if mode != IoMode::Read {
        return Err(ArfxError::InvalidArgument("lines files are read-only".into()));
    }
    let text = fs::read_to_string(path).map_err(|e| ArfxError::open_failed(path, e))?;
    let entries = text
        .lines()
        .map(|l| l.split(',').map(|v| v.trim().parse::<i16>().unwrap_or(0)).collect())
        .collect();
    Ok(Box::new(Lines { entries, active: 0, consumed: false }))
}

const LINES: FormatDescriptor = FormatDescriptor {
    name:         "lines",
    api_version:  FORMAT_API_VERSION,
    extensions:   &[".lines"],
    capabilities: Capabilities { multi_entry: true, settable_timestamp: false },
    open:         open_lines,
};

#[test]
fn multi_entry_source_uses_numbered_names() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("rec.lines");
    fs::write(&src, "1,2,3\n4,5\n6\n").unwrap();
    let arf = dir.path().join("multi.arf");

    let registry = FormatRegistry::builtin_with([LINES]).unwrap();
    let report = Dispatcher::new(registry, Options::default())
        .run(Operation::Create, &arf, &[s(&src)])
        .unwrap();
    assert!(report.is_success(), "{:?}", report.failures);

    assert_eq!(entry_names(&arf), vec!["rec.0", "rec.1", "rec.2"]);
    assert_eq!(pcm_frames(&arf, "rec.1"), vec![4, 5]);
    let c = Container::open(&arf, OpenMode::Read).unwrap();
    let entry = c.entry("rec.2").unwrap();
    assert_eq!(entry.timestamp, Timestamp::new(1_600_000_002, 0));
    assert_eq!(entry.channel(PCM_CHANNEL).unwrap().attrs["source_entry"], AttrValue::Int(2));
}

#[test]
fn conflicting_external_plugin_is_rejected_at_startup() {
    let clash = FormatDescriptor { name: "other", extensions: &[".wav"], ..LINES };
    let err = FormatRegistry::builtin_with([clash]).unwrap_err();
    assert_eq!(err.kind(), "RegistryError");
}

// ── Copy / update / attributes ───────────────────────────────────────────────

#[test]
fn copy_whole_containers_and_single_entries() {
    let dir = tempdir().unwrap();
    let mk = |name: &str, entries: &[&str]| {
        let files: Vec<String> = entries
            .iter()
            .map(|e| {
                let p = dir.path().join(format!("{e}.pcm"));
                write_pcm(&p, &ramp(32, 5));
                s(&p)
            })
            .collect();
        let arf = dir.path().join(name);
        run(Options::default(), Operation::Create, &arf, &files);
        arf
    };
    let one = mk("one.arf", &["a", "b"]);
    let two = mk("two.arf", &["c"]);
    let dst = dir.path().join("all.arf");

    let items = vec![format!("{}/b", s(&one)), s(&two)];
    let report = run(Options::default(), Operation::Copy, &dst, &items);
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(entry_names(&dst), vec!["b", "c"]);
    assert_eq!(pcm_frames(&dst, "b"), ramp(32, 5));

    let src_uuid = Container::open(&one, OpenMode::Read).unwrap().entry("b").unwrap().uuid;
    assert_eq!(Container::open(&dst, OpenMode::Read).unwrap().entry("b").unwrap().uuid, src_uuid);

    let items = vec![format!("{}/b", s(&one)), format!("{}/zzz", s(&one))];
    let report = run(Options::default(), Operation::Copy, &dst, &items);
    let kinds: Vec<_> = report.failures.iter().map(|f| f.error.kind()).collect();
    assert_eq!(kinds, vec!["NoSuchEntry", "NameConflict"]);
}

#[test]
fn update_sets_attrs_and_renames() {
    let dir = tempdir().unwrap();
    let arf = three_entries(dir.path());

    let mut opts = Options::default();
    opts.metadata.entry_attrs.insert("pen".into(), AttrValue::Text("2".into()));
    let report = run(opts, Operation::Update, &arf, &["x".into()]);
    assert!(report.is_success());
    let c = Container::open(&arf, OpenMode::Read).unwrap();
    assert_eq!(c.entry("x").unwrap().attrs["pen"], AttrValue::Text("2".into()));
    assert!(c.entry("y").unwrap().attrs.is_empty());
    drop(c);

    let opts = Options { name: Some("site".into()), ..Options::default() };
    run(opts, Operation::Update, &arf, &[]);
    assert_eq!(entry_names(&arf), vec!["site.0", "site.1", "site.2"]);
}

#[test]
fn invalid_rename_base_is_an_item_failure() {
    let dir = tempdir().unwrap();
    let arf = three_entries(dir.path());

    let mut opts = Options { name: Some("bad/base".into()), ..Options::default() };
    opts.metadata.entry_attrs.insert("pen".into(), AttrValue::Text("3".into()));
    let report = run(opts, Operation::Update, &arf, &[]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].error.kind(), "InvalidArgument");
    assert_eq!(report.succeeded, 3);

    assert_eq!(entry_names(&arf), vec!["x", "y", "z"]);
    let c = Container::open(&arf, OpenMode::Read).unwrap();
    assert_eq!(c.entry("z").unwrap().attrs["pen"], AttrValue::Text("3".into()));
}

#[test]
fn attribute_files_round_trip() {
    let dir = tempdir().unwrap();
    let notes = dir.path().join("notes.txt");
    fs::write(&notes, "bird C194\nday 3\n").unwrap();
    let arf = dir.path().join("attr.arf");
    Container::create(&arf, ContainerOptions::default()).unwrap().close().unwrap();

    let report = run(Options::default(), Operation::WriteAttr, &arf, &[s(&notes)]);
    assert!(report.is_success());
    let c = Container::open(&arf, OpenMode::Read).unwrap();
    assert_eq!(c.attr("user_notes.txt"), Some(&AttrValue::Text("bird C194\nday 3\n".into())));
    drop(c);

    let report = run(Options::default(), Operation::ReadAttr, &arf, &["notes.txt".into(), "other".into()]);
    assert_eq!(report.output, vec!["bird C194\nday 3\n"]);
    assert_eq!(report.failures.len(), 1);
}
