//! H.264 NAL unit classification.
//!
//! The relay never looks inside a NAL unit beyond its one-byte header; the
//! type is used for logging.

use bytes::Bytes;

/// NAL unit types defined by H.264 (ITU-T H.264 table 7-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    /// Non-IDR slice (P/B frame).
    NonIdrSlice = 1,
    /// Slice data partition A.
    PartitionA = 2,
    /// Slice data partition B.
    PartitionB = 3,
    /// Slice data partition C.
    PartitionC = 4,
    /// IDR slice (keyframe).
    IdrSlice = 5,
    /// Supplemental Enhancement Information.
    Sei = 6,
    /// Sequence Parameter Set.
    Sps = 7,
    /// Picture Parameter Set.
    Pps = 8,
    /// Access Unit Delimiter.
    Aud = 9,
    /// End of sequence.
    EndOfSequence = 10,
    /// End of stream.
    EndOfStream = 11,
    /// Filler data.
    FillerData = 12,
    /// SPS extension.
    SpsExtension = 13,
    /// Prefix NAL unit (SVC/MVC).
    PrefixNalUnit = 14,
    /// Subset SPS.
    SubsetSps = 15,
    /// Depth parameter set.
    Dps = 16,
    /// Auxiliary coded picture without partitioning.
    AuxCodedPicture = 19,
    /// Coded slice extension.
    SliceExtension = 20,
    /// Coded slice extension for depth view components.
    DepthViewExtension = 21,
    /// Reserved, unspecified or packetization types.
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            2 => NalUnitType::PartitionA,
            3 => NalUnitType::PartitionB,
            4 => NalUnitType::PartitionC,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            12 => NalUnitType::FillerData,
            13 => NalUnitType::SpsExtension,
            14 => NalUnitType::PrefixNalUnit,
            15 => NalUnitType::SubsetSps,
            16 => NalUnitType::Dps,
            19 => NalUnitType::AuxCodedPicture,
            20 => NalUnitType::SliceExtension,
            21 => NalUnitType::DepthViewExtension,
            _ => NalUnitType::Other,
        }
    }
}

impl NalUnitType {
    /// Log name for this type.
    pub fn name(self) -> &'static str {
        match self {
            Self::NonIdrSlice => "NON_IDR_SLICE",
            Self::PartitionA => "PARTITION_A",
            Self::PartitionB => "PARTITION_B",
            Self::PartitionC => "PARTITION_C",
            Self::IdrSlice => "IDR_SLICE",
            Self::Sei => "SEI",
            Self::Sps => "SPS",
            Self::Pps => "PPS",
            Self::Aud => "AUD",
            Self::EndOfSequence => "EOS",
            Self::EndOfStream => "EOB",
            Self::FillerData => "FILLER_DATA",
            Self::SpsExtension => "SPS_EXTENSION",
            Self::PrefixNalUnit => "PREFIX_NAL_UNIT",
            Self::SubsetSps => "SUBSET_SPS",
            Self::Dps => "DPS",
            Self::AuxCodedPicture => "AUX_CODED_PICTURE",
            Self::SliceExtension => "SLICE_EXTENSION",
            Self::DepthViewExtension => "DEPTH_VIEW",
            Self::Other => "Unhandled NAL Type",
        }
    }
}

/// A single NAL unit, header byte included, without start code or length
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// The NAL unit type.
    pub nal_type: NalUnitType,
    /// The NAL unit data.
    pub data: Bytes,
}

impl NalUnit {
    /// Wrap `data`, classifying it by its header byte.
    ///
    /// Returns `None` for empty input.
    pub fn new(data: Bytes) -> Option<Self> {
        let header = *data.first()?;
        Some(Self {
            nal_type: NalUnitType::from(header),
            data,
        })
    }

    /// The raw 5-bit type field.
    pub fn type_code(&self) -> u8 {
        self.data[0] & 0x1F
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: empty NAL units cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Release the payload.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_header_byte() {
        assert_eq!(NalUnitType::from(0x65), NalUnitType::IdrSlice);
        assert_eq!(NalUnitType::from(0x41), NalUnitType::NonIdrSlice);
        assert_eq!(NalUnitType::from(0x67), NalUnitType::Sps);
        assert_eq!(NalUnitType::from(0x68), NalUnitType::Pps);
        assert_eq!(NalUnitType::from(0x06), NalUnitType::Sei);
        assert_eq!(NalUnitType::from(0x1C), NalUnitType::Other);
    }

    #[test]
    fn test_names() {
        assert_eq!(NalUnitType::IdrSlice.name(), "IDR_SLICE");
        assert_eq!(NalUnitType::NonIdrSlice.name(), "NON_IDR_SLICE");
        assert_eq!(NalUnitType::Other.name(), "Unhandled NAL Type");
    }

    #[test]
    fn test_nal_unit_new() {
        let nal = NalUnit::new(Bytes::from_static(&[0x67, 0x42, 0x00, 0x1E])).unwrap();
        assert_eq!(nal.nal_type, NalUnitType::Sps);
        assert_eq!(nal.type_code(), 7);
        assert_eq!(nal.len(), 4);

        assert!(NalUnit::new(Bytes::new()).is_none());
    }
}
