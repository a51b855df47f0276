//! Arbitrary pass-through OBUs.
//!
//! Used to round-trip unknown, reserved or experimental OBU types without
//! interpreting their payload, and to inject OBUs at fixed points of the
//! serialized sequence.

use anyhow::Result;

use crate::structs::header::{ObuHeader, ObuType, write_obu};
use crate::utils::bitstream_io::{BitstreamIoWriter, BsIoSliceReader};

/// Where an arbitrary OBU is placed in the output bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionHook {
    BeforeDescriptors,
    AfterDescriptors,
    AfterIaSequenceHeader,
    /// After the audio frames of the temporal unit starting at
    /// `insertion_tick`.
    AfterAudioFramesAtTick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbitraryObu {
    pub header: ObuHeader,
    pub obu_type: ObuType,
    pub payload: Vec<u8>,
    pub insertion_hook: InsertionHook,
    /// Required for [`InsertionHook::AfterAudioFramesAtTick`].
    pub insertion_tick: Option<i64>,
}

impl ArbitraryObu {
    pub fn new(
        obu_type: ObuType,
        header: ObuHeader,
        payload: Vec<u8>,
        insertion_hook: InsertionHook,
    ) -> Self {
        Self {
            header,
            obu_type,
            payload,
            insertion_hook,
            insertion_tick: None,
        }
    }

    pub fn write(&self, w: &mut BitstreamIoWriter) -> Result<()> {
        write_obu(self.obu_type, &self.header, w, |pw| {
            pw.put_bytes(&self.payload)
        })
    }

    pub fn read(
        obu_type: ObuType,
        header: ObuHeader,
        payload_size: u64,
        insertion_hook: InsertionHook,
        r: &mut BsIoSliceReader,
    ) -> Result<Self> {
        let payload = r.get_vec(payload_size as usize)?;
        Ok(Self {
            header,
            obu_type,
            payload,
            insertion_hook,
            insertion_tick: None,
        })
    }

    /// Writes every OBU registered for `insertion_hook`, in input order.
    pub fn write_obus_with_hook(
        insertion_hook: InsertionHook,
        arbitrary_obus: &[ArbitraryObu],
        w: &mut BitstreamIoWriter,
    ) -> Result<()> {
        for obu in arbitrary_obus {
            if obu.insertion_hook == insertion_hook {
                obu.write(w)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_type_round_trips() {
        let obu = ArbitraryObu::new(
            ObuType::Reserved(25),
            ObuHeader::default(),
            vec![0x01, 0x02, 0x03],
            InsertionHook::AfterDescriptors,
        );
        let mut w = BitstreamIoWriter::default();
        obu.write(&mut w).unwrap();
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes, [0b11001_000, 3, 1, 2, 3]);

        let mut r = BsIoSliceReader::from_slice(&bytes);
        let (obu_type, header, payload_size) = ObuHeader::read(&mut r).unwrap();
        let read = ArbitraryObu::read(
            obu_type,
            header,
            payload_size,
            InsertionHook::AfterDescriptors,
            &mut r,
        )
        .unwrap();
        assert_eq!(read, obu);
    }

    #[test]
    fn hook_filter_writes_matching_obus_in_order() {
        let obus = vec![
            ArbitraryObu::new(
                ObuType::Reserved(24),
                ObuHeader::default(),
                vec![0xAA],
                InsertionHook::BeforeDescriptors,
            ),
            ArbitraryObu::new(
                ObuType::Reserved(24),
                ObuHeader::default(),
                vec![0xBB],
                InsertionHook::AfterDescriptors,
            ),
            ArbitraryObu::new(
                ObuType::Reserved(24),
                ObuHeader::default(),
                vec![0xCC],
                InsertionHook::BeforeDescriptors,
            ),
        ];

        let mut w = BitstreamIoWriter::default();
        ArbitraryObu::write_obus_with_hook(InsertionHook::BeforeDescriptors, &obus, &mut w)
            .unwrap();
        assert_eq!(
            w.into_bytes().unwrap(),
            [0b11000_000, 1, 0xAA, 0b11000_000, 1, 0xCC]
        );
    }
}
