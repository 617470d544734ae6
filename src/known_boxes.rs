use crate::boxes::FourCC;

/// Box types commonly found in (fragmented) MP4 streams, for display.
///
/// Anything not in this list becomes `KnownBox::Unknown(fourcc)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownBox {
    // File-level / top-level
    Ftyp,
    Styp,
    Moov,
    Moof,
    Mdat,
    Free,
    Skip,
    Sidx,
    Emsg,
    Prft,
    Mfra,

    // moov
    Mvhd,
    Trak,
    Mvex,
    Mehd,
    Trex,
    Udta,
    Pssh,

    // trak
    Tkhd,
    Edts,
    Elst,
    Mdia,
    Mdhd,
    Hdlr,
    Minf,
    Vmhd,
    Smhd,
    Dinf,
    Stbl,

    // stbl
    Stsd,
    Stts,
    Stsc,
    Stsz,
    Stco,

    // sample entries
    Avc1,
    Avc2,
    Avc3,
    Avc4,
    Avcc,
    Btrt,
    Pasp,
    Mp4a,

    // moof
    Mfhd,
    Traf,
    Tfhd,
    Tfdt,
    Trun,
    Sdtp,

    Uuid,

    // Anything else
    Unknown(FourCC),
}

impl From<FourCC> for KnownBox {
    fn from(cc: FourCC) -> Self {
        match &cc.0 {
            b"ftyp" => KnownBox::Ftyp,
            b"styp" => KnownBox::Styp,
            b"moov" => KnownBox::Moov,
            b"moof" => KnownBox::Moof,
            b"mdat" => KnownBox::Mdat,
            b"free" => KnownBox::Free,
            b"skip" => KnownBox::Skip,
            b"sidx" => KnownBox::Sidx,
            b"emsg" => KnownBox::Emsg,
            b"prft" => KnownBox::Prft,
            b"mfra" => KnownBox::Mfra,

            b"mvhd" => KnownBox::Mvhd,
            b"trak" => KnownBox::Trak,
            b"mvex" => KnownBox::Mvex,
            b"mehd" => KnownBox::Mehd,
            b"trex" => KnownBox::Trex,
            b"udta" => KnownBox::Udta,
            b"pssh" => KnownBox::Pssh,

            b"tkhd" => KnownBox::Tkhd,
            b"edts" => KnownBox::Edts,
            b"elst" => KnownBox::Elst,
            b"mdia" => KnownBox::Mdia,
            b"mdhd" => KnownBox::Mdhd,
            b"hdlr" => KnownBox::Hdlr,
            b"minf" => KnownBox::Minf,
            b"vmhd" => KnownBox::Vmhd,
            b"smhd" => KnownBox::Smhd,
            b"dinf" => KnownBox::Dinf,
            b"stbl" => KnownBox::Stbl,

            b"stsd" => KnownBox::Stsd,
            b"stts" => KnownBox::Stts,
            b"stsc" => KnownBox::Stsc,
            b"stsz" => KnownBox::Stsz,
            b"stco" => KnownBox::Stco,

            b"avc1" => KnownBox::Avc1,
            b"avc2" => KnownBox::Avc2,
            b"avc3" => KnownBox::Avc3,
            b"avc4" => KnownBox::Avc4,
            b"avcC" => KnownBox::Avcc,
            b"btrt" => KnownBox::Btrt,
            b"pasp" => KnownBox::Pasp,
            b"mp4a" => KnownBox::Mp4a,

            b"mfhd" => KnownBox::Mfhd,
            b"traf" => KnownBox::Traf,
            b"tfhd" => KnownBox::Tfhd,
            b"tfdt" => KnownBox::Tfdt,
            b"trun" => KnownBox::Trun,
            b"sdtp" => KnownBox::Sdtp,

            b"uuid" => KnownBox::Uuid,

            _ => KnownBox::Unknown(cc),
        }
    }
}

impl KnownBox {
    /// Human-readable name from ISO/IEC 14496-12 (and 14496-15 for AVC).
    pub fn full_name(&self) -> &'static str {
        match self {
            KnownBox::Ftyp => "File Type Box",
            KnownBox::Styp => "Segment Type Box",
            KnownBox::Moov => "Movie Box",
            KnownBox::Moof => "Movie Fragment Box",
            KnownBox::Mdat => "Media Data Box",
            KnownBox::Free => "Free Space Box",
            KnownBox::Skip => "Free Space Box",
            KnownBox::Sidx => "Segment Index Box",
            KnownBox::Emsg => "Event Message Box",
            KnownBox::Prft => "Producer Reference Time Box",
            KnownBox::Mfra => "Movie Fragment Random Access Box",

            KnownBox::Mvhd => "Movie Header Box",
            KnownBox::Trak => "Track Box",
            KnownBox::Mvex => "Movie Extends Box",
            KnownBox::Mehd => "Movie Extends Header Box",
            KnownBox::Trex => "Track Extends Box",
            KnownBox::Udta => "User Data Box",
            KnownBox::Pssh => "Protection System Specific Header Box",

            KnownBox::Tkhd => "Track Header Box",
            KnownBox::Edts => "Edit Box",
            KnownBox::Elst => "Edit List Box",
            KnownBox::Mdia => "Media Box",
            KnownBox::Mdhd => "Media Header Box",
            KnownBox::Hdlr => "Handler Reference Box",
            KnownBox::Minf => "Media Information Box",
            KnownBox::Vmhd => "Video Media Header Box",
            KnownBox::Smhd => "Sound Media Header Box",
            KnownBox::Dinf => "Data Information Box",
            KnownBox::Stbl => "Sample Table Box",

            KnownBox::Stsd => "Sample Description Box",
            KnownBox::Stts => "Decoding Time to Sample Box",
            KnownBox::Stsc => "Sample To Chunk Box",
            KnownBox::Stsz => "Sample Size Box",
            KnownBox::Stco => "Chunk Offset Box",

            KnownBox::Avc1 | KnownBox::Avc2 | KnownBox::Avc3 | KnownBox::Avc4 => "AVC Sample Entry",
            KnownBox::Avcc => "AVC Configuration Box",
            KnownBox::Btrt => "Bit Rate Box",
            KnownBox::Pasp => "Pixel Aspect Ratio Box",
            KnownBox::Mp4a => "MPEG-4 Audio Sample Entry",

            KnownBox::Mfhd => "Movie Fragment Header Box",
            KnownBox::Traf => "Track Fragment Box",
            KnownBox::Tfhd => "Track Fragment Header Box",
            KnownBox::Tfdt => "Track Fragment Decode Time Box",
            KnownBox::Trun => "Track Fragment Run Box",
            KnownBox::Sdtp => "Independent and Disposable Samples Box",

            KnownBox::Uuid => "User Extension Box",
            KnownBox::Unknown(_) => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(KnownBox::from(FourCC(*b"trun")).full_name(), "Track Fragment Run Box");
        assert_eq!(KnownBox::from(FourCC(*b"avc3")), KnownBox::Avc3);
        assert_eq!(KnownBox::from(FourCC(*b"zzzz")), KnownBox::Unknown(FourCC(*b"zzzz")));
    }
}
