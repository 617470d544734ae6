mod common;

use common::{Event, MOOF_DATA, Recorder, boxed, concat, full_boxed};
use isomp4::boxes_moof::{SampleFlags, TfhdBox, TfhdEncoding, TrunBox, TrunEncoding};
use isomp4::boxes_moov::{HdlrBox, StsdBox};
use isomp4::boxes_sample_entry::{AvcSampleEntryBox, video_codec};
use isomp4::{BoxEncoding, Error, FourCC, Mp4Box, Mp4Parser, default_registry};
use proptest::prelude::*;

const AVCC_BYTES: &[u8] = &[
    0x00, 0x00, 0x00, 0x32, b'a', b'v', b'c', b'C', // size 50
    0x01, 0x4D, 0x00, 0x29, 0xFF, 0xE1, // version 1, main@4.1, 4-byte NALs, 1 SPS
    0x00, 0x1B, 0x67, 0x4D, 0x00, 0x29, 0xE2, 0x90, 0x0A, 0x00, 0xB7, 0x60, //
    0x2D, 0xC0, 0x40, 0x40, //
    0x69, 0x40, 0x03, 0x6E, 0xE8, 0x00, 0x66, 0xFF, 0x30, 0x03, 0xC4, 0x88, 0xA8, //
    0x01, 0x00, 0x04, 0x68, 0xEE, 0x3C, 0x80, // 1 PPS of 4 bytes
];

fn visual_entry() -> Vec<u8> {
    let mut v = vec![0u8; 78];
    v[7] = 1; // data_reference_index
    v[24..26].copy_from_slice(&1280u16.to_be_bytes());
    v[26..28].copy_from_slice(&720u16.to_be_bytes());
    v[28..32].copy_from_slice(&0x0048_0000u32.to_be_bytes());
    v[32..36].copy_from_slice(&0x0048_0000u32.to_be_bytes());
    v[41] = 1; // frame_count
    v[42] = 4;
    v[43..47].copy_from_slice(b"test");
    v[74..76].copy_from_slice(&0x0018u16.to_be_bytes());
    v[76..78].copy_from_slice(&[0xFF, 0xFF]);
    v
}

fn avc_moov() -> Vec<u8> {
    let btrt = boxed(b"btrt", &[0u8; 12]);
    let avc1 = boxed(b"avc1", &concat(&[&visual_entry(), AVCC_BYTES, &btrt]));
    let stsd = full_boxed(b"stsd", 0, 0, &concat(&[&1u32.to_be_bytes(), &avc1]));
    let stbl = boxed(b"stbl", &stsd);
    let minf = boxed(b"minf", &stbl);
    let mut hdlr = vec![0u8; 4];
    hdlr.extend_from_slice(b"vide");
    hdlr.extend_from_slice(&[0u8; 12]);
    hdlr.extend_from_slice(b"VideoHandler\0");
    let hdlr = full_boxed(b"hdlr", 0, 0, &hdlr);
    let mdia = boxed(b"mdia", &concat(&[&hdlr, &minf]));
    let trak = boxed(b"trak", &mdia);
    boxed(b"moov", &trak)
}

fn path<'a>(root: &'a Mp4Box, types: &[&[u8; 4]]) -> &'a Mp4Box {
    types.iter().fold(root, |b, t| b.child(FourCC(**t)).unwrap())
}

#[test]
fn avc_sample_entry_through_the_parser() {
    let mut p = Mp4Parser::with_registry(default_registry().unwrap(), Recorder::default());
    p.append(&avc_moov()).unwrap();
    assert!(p.is_idle());

    let rec = p.handler();
    assert!(rec.started().contains(&"btrt".to_string()));
    assert!(rec.events.contains(&Event::Ended("btrt".into(), false)));
    // avcC is read as part of the entry, not as a child box
    assert!(!rec.started().contains(&"avcC".to_string()));

    let moov = &rec.top_level[0];
    let hdlr = path(moov, &[b"trak", b"mdia", b"hdlr"]).body::<HdlrBox>().unwrap();
    assert_eq!(hdlr.name, "VideoHandler");

    let stsd = path(moov, &[b"trak", b"mdia", b"minf", b"stbl", b"stsd"]);
    assert_eq!(stsd.body::<StsdBox>().unwrap().entry_count, 1);
    let avc1 = stsd.child(FourCC(*b"avc1")).unwrap().body::<AvcSampleEntryBox>().unwrap();
    assert_eq!((avc1.entry.width, avc1.entry.height), (1280, 720));
    assert_eq!(avc1.entry.horizontal_resolution, 72.0);
    assert_eq!(avc1.entry.compressor_name, "test");
    assert_eq!(avc1.entry.depth, 0x18);
    assert_eq!(avc1.config.as_ref().unwrap().picture_parameter_sets.len(), 1);

    assert_eq!(video_codec(stsd).unwrap(), "avc1.4d0029");
}

#[test]
fn avc_sample_entry_split_inside_avcc() {
    let data = avc_moov();
    let mut p = Mp4Parser::with_registry(default_registry().unwrap(), Recorder::default());
    // stop inside the avcC box
    let cut = data.len() - 60;
    p.append(&data[..cut]).unwrap();
    assert!(!p.is_idle());
    p.append(&data[cut..]).unwrap();
    let stsd = path(&p.handler().top_level[0], &[b"trak", b"mdia", b"minf", b"stbl", b"stsd"]);
    assert_eq!(video_codec(stsd).unwrap(), "avc1.4d0029");
}

#[test]
fn video_codec_without_entries() {
    let stsd = full_boxed(b"stsd", 0, 0, &0u32.to_be_bytes());
    let mut p = Mp4Parser::with_registry(default_registry().unwrap(), Recorder::default());
    let stbl = boxed(b"stbl", &stsd);
    let moov = boxed(b"moov", &boxed(b"trak", &boxed(b"mdia", &boxed(b"minf", &stbl))));
    p.append(&moov).unwrap();
    let stsd = path(&p.handler().top_level[0], &[b"trak", b"mdia", b"minf", b"stbl", b"stsd"]);
    assert!(matches!(video_codec(stsd), Err(Error::MissingBox { .. })));
}

#[test]
fn tfhd_with_base_data_offset() {
    let mut f = 7u32.to_be_bytes().to_vec();
    f.extend_from_slice(&0x1_0000_0000u64.to_be_bytes());
    f.extend_from_slice(&2u32.to_be_bytes()); // sample description index
    let bytes = full_boxed(b"tfhd", 0, 0x020003, &f);

    let (b, used) = TfhdEncoding.decode(&bytes).unwrap().done().unwrap();
    assert_eq!(used, bytes.len());
    let tfhd = b.body::<TfhdBox>().unwrap();
    assert_eq!(tfhd.track_id, 7);
    assert_eq!(tfhd.base_data_offset, Some(0x1_0000_0000));
    assert_eq!(tfhd.sample_description_index, Some(2));
    assert_eq!(tfhd.default_sample_duration, None);
    assert_eq!(TfhdEncoding.encode(&b).unwrap(), bytes);
}

#[test]
fn tfhd_base_data_offset_above_safe_range() {
    let mut f = 1u32.to_be_bytes().to_vec();
    f.extend_from_slice(&u64::MAX.to_be_bytes());
    let bytes = full_boxed(b"tfhd", 0, 0x000001, &f);
    assert!(matches!(TfhdEncoding.decode(&bytes), Err(Error::ValueOverflow { .. })));
}

#[test]
fn trun_v1_signed_composition_offsets() {
    let mut f = Vec::new();
    f.extend_from_slice(&2u32.to_be_bytes());
    f.extend_from_slice(&(-8i32).to_be_bytes()); // data offset
    for (duration, size, cto) in [(100u32, 500u32, -20i32), (100, 300, 40)] {
        f.extend_from_slice(&duration.to_be_bytes());
        f.extend_from_slice(&size.to_be_bytes());
        f.extend_from_slice(&cto.to_be_bytes());
    }
    let bytes = full_boxed(b"trun", 1, 0x000B01, &f);

    let (b, used) = TrunEncoding.decode(&bytes).unwrap().done().unwrap();
    assert_eq!(used, 44);
    let trun = b.body::<TrunBox>().unwrap();
    assert_eq!(trun.data_offset, Some(-8));
    assert_eq!(trun.samples.len(), 2);
    assert_eq!(trun.samples[0].composition_time_offset, Some(-20));
    assert_eq!(trun.samples[1].size, Some(300));
    assert_eq!(trun.samples[1].flags, None);
    assert_eq!(TrunEncoding.encode(&b).unwrap(), bytes);
}

#[test]
fn trun_v0_composition_offsets_are_unsigned() {
    let mut f = 1u32.to_be_bytes().to_vec();
    f.extend_from_slice(&0xFFFF_FFECu32.to_be_bytes());
    let bytes = full_boxed(b"trun", 0, 0x000800, &f);
    let (b, _) = TrunEncoding.decode(&bytes).unwrap().done().unwrap();
    let trun = b.body::<TrunBox>().unwrap();
    assert_eq!(trun.samples[0].composition_time_offset, Some(0xFFFF_FFEC));
}

#[test]
fn trun_first_sample_flags_apply_to_first_sample() {
    let mut f = 2u32.to_be_bytes().to_vec();
    f.extend_from_slice(&0x0200_0000u32.to_be_bytes()); // first sample flags
    f.extend_from_slice(&1000u32.to_be_bytes());
    f.extend_from_slice(&200u32.to_be_bytes());
    let bytes = full_boxed(b"trun", 0, 0x000204, &f);

    let (b, _) = TrunEncoding.decode(&bytes).unwrap().done().unwrap();
    let trun = b.body::<TrunBox>().unwrap();
    assert_eq!(trun.first_sample_flags, Some(0x0200_0000));
    assert_eq!(trun.samples[0].flags, Some(0x0200_0000));
    assert!(SampleFlags::parse(trun.samples[0].flags.unwrap()).is_sync());
    assert_eq!(trun.samples[1].flags, None);
    assert_eq!(trun.samples[1].size, Some(200));
}

#[test]
fn trun_huge_count_without_sample_fields() {
    let bytes = full_boxed(b"trun", 0, 0, &u32::MAX.to_be_bytes());
    let (b, used) = TrunEncoding.decode(&bytes).unwrap().done().unwrap();
    assert_eq!(used, bytes.len());
    let trun = b.body::<TrunBox>().unwrap();
    assert_eq!(trun.sample_count, u32::MAX);
    assert!(trun.samples.is_empty());
}

fn parse_with_splits(data: &[u8], sizes: &[usize]) -> Recorder {
    let mut p = Mp4Parser::with_registry(default_registry().unwrap(), Recorder::default());
    let mut pos = 0;
    for size in sizes.iter().cycle() {
        if pos >= data.len() {
            break;
        }
        let end = (pos + size).min(data.len());
        p.append(&data[pos..end]).unwrap();
        pos = end;
    }
    assert!(p.is_idle());
    p.into_handler()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Any chunking yields the same events, bytes and decoded boxes.
    #[test]
    fn arbitrary_chunking_matches_single_append(sizes in prop::collection::vec(1usize..64, 1..16)) {
        let data = concat(&[&avc_moov(), MOOF_DATA, &boxed(b"mdat", &[0xAB; 100])]);
        let whole = parse_with_splits(&data, &[data.len()]);
        let split = parse_with_splits(&data, &sizes);

        prop_assert_eq!(&split.bytes, &data);
        prop_assert_eq!(&split.events, &whole.events);
        let a: Vec<_> = whole.top_level.iter().map(Mp4Box::to_json).collect();
        let b: Vec<_> = split.top_level.iter().map(Mp4Box::to_json).collect();
        prop_assert_eq!(a, b);
    }

    /// Random bytes either parse or fail cleanly; they never panic or stall
    /// with a decoder that cannot make progress.
    #[test]
    fn random_input_never_panics(
        data in prop::collection::vec(any::<u8>(), 0..256),
        chunk in 1usize..32,
    ) {
        let mut p = Mp4Parser::with_registry(default_registry().unwrap(), ());
        for c in data.chunks(chunk) {
            match p.append(c) {
                Ok(()) => {}
                Err(e) => {
                    prop_assert!(!matches!(e, Error::NoProgress { .. }), "{e}");
                    break;
                }
            }
        }
    }
}
