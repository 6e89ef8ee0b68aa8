use crate::{
    error::{ChunkError, Result},
    record::{AlignmentRecord, SequenceVariation},
};

use super::bits::{BitReader, BitWriter};

/// Registration code written as the first byte of every payload produced by [`VariationCodec`]
pub const REGISTRATION_CODE: u8 = 2;

/// Symbols representable in 3 bits, indexed by their code
const BASES: [u8; 7] = [b'A', b'C', b'T', b'G', b'N', b'-', b'.'];

/// A secondary compressor applied to individual record fields
///
/// Codecs are stateful: deltas are taken against the previous value seen by the same
/// instance, so the encoding and decoding sides must each call [`EntryCodec::new_chunk`]
/// at the same chunk boundaries.
pub trait EntryCodec: Send {
    /// Code that identifies payloads produced by this codec
    fn registration_code(&self) -> u8;

    /// Packs the codec's fields into `compressed_data`
    ///
    /// Returns `None` when the record cannot be represented, in which case the caller stores
    /// it uncompressed.
    fn encode(&mut self, record: &AlignmentRecord) -> Option<AlignmentRecord>;

    /// Restores the fields packed by [`EntryCodec::encode`]
    ///
    /// Returns `Ok(None)` when the record carries no payload or one produced by another
    /// codec. A payload with this codec's code that cannot be decoded is an error.
    fn decode(&mut self, record: &AlignmentRecord) -> Result<Option<AlignmentRecord>>;

    /// Resets the delta state at a chunk boundary
    fn new_chunk(&mut self);
}

/// Delta/unary/3-bit codec for positions, mapping qualities and sequence variations
#[derive(Debug, Default, Clone)]
pub struct VariationCodec {
    previous_position: u32,
    previous_mapping_quality: u32,
    decoded_position: u32,
    decoded_mapping_quality: u32,
}
impl VariationCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn base_code(base: u8) -> Option<u64> {
    BASES.iter().position(|b| *b == base).map(|i| i as u64)
}

fn write_bases(writer: &mut BitWriter, bases: &[u8]) -> Option<()> {
    writer.write_unary(bases.len() as u32);
    for base in bases {
        writer.write_int(base_code(*base)?, 3);
    }
    Some(())
}

fn read_bases(reader: &mut BitReader) -> Option<Vec<u8>> {
    let len = reader.read_unary()?;
    (0..len)
        .map(|_| {
            let code = reader.read_int(3)? as usize;
            BASES.get(code).copied()
        })
        .collect()
}

fn write_signed_delta(writer: &mut BitWriter, value: u32, previous: u32) {
    let diff = i64::from(value) - i64::from(previous);
    if diff >= 0 {
        writer.write_bit(true);
        writer.write_delta(diff.unsigned_abs() + 1);
    } else {
        writer.write_bit(false);
        writer.write_delta(diff.unsigned_abs());
    }
}

fn read_signed_delta(reader: &mut BitReader, previous: u32) -> Option<u32> {
    let positive = reader.read_bit()?;
    let magnitude = reader.read_delta()?;
    let diff = if positive {
        i64::try_from(magnitude - 1).ok()?
    } else {
        -i64::try_from(magnitude).ok()?
    };
    u32::try_from(i64::from(previous) + diff).ok()
}

impl EntryCodec for VariationCodec {
    fn registration_code(&self) -> u8 {
        REGISTRATION_CODE
    }

    fn encode(&mut self, record: &AlignmentRecord) -> Option<AlignmentRecord> {
        if record.compressed_data.is_some() {
            return None;
        }
        let mut writer = BitWriter::new();
        writer.write_int(u64::from(REGISTRATION_CODE), 8);
        writer.write_unary(record.sequence_variations.len() as u32);
        for var in &record.sequence_variations {
            if var.validate().is_err() {
                return None;
            }
            write_bases(&mut writer, &var.from)?;
            write_bases(&mut writer, &var.to)?;
            writer.write_delta(u64::from(var.position) + 1);
            writer.write_delta(u64::from(var.read_index) + 1);
            writer.write_unary(var.to_quality.len() as u32);
            for q in &var.to_quality {
                writer.write_delta(u64::from(*q) + 1);
            }
        }

        // Presence bits keep zero positions distinct from absent ones.
        writer.write_bit(true);
        write_signed_delta(&mut writer, record.position, self.previous_position);
        self.previous_position = record.position;
        match record.mapping_quality {
            Some(mq) => {
                writer.write_bit(true);
                write_signed_delta(&mut writer, mq, self.previous_mapping_quality);
                self.previous_mapping_quality = mq;
            }
            None => writer.write_bit(false),
        }

        let mut encoded = record.clone();
        encoded.position = 0;
        encoded.mapping_quality = None;
        encoded.sequence_variations.clear();
        encoded.compressed_data = Some(writer.finish());
        Some(encoded)
    }

    fn decode(&mut self, record: &AlignmentRecord) -> Result<Option<AlignmentRecord>> {
        let Some(data) = record.compressed_data.as_deref() else {
            return Ok(None);
        };
        if data.first() != Some(&REGISTRATION_CODE) {
            return Ok(None);
        }
        let mut reader = BitReader::new(&data[1..]);
        let decoded = self
            .decode_fields(&mut reader, record)
            .ok_or(ChunkError::MalformedPayload {
                code: REGISTRATION_CODE,
                query_index: record.query_index,
            })?;
        Ok(Some(decoded))
    }

    fn new_chunk(&mut self) {
        self.previous_position = 0;
        self.previous_mapping_quality = 0;
        self.decoded_position = 0;
        self.decoded_mapping_quality = 0;
    }
}
impl VariationCodec {
    /// Reads everything after the registration code; `None` if the bits run out
    fn decode_fields(
        &mut self,
        reader: &mut BitReader,
        record: &AlignmentRecord,
    ) -> Option<AlignmentRecord> {
        let n_variations = reader.read_unary()?;
        let mut variations = Vec::with_capacity(n_variations as usize);
        for _ in 0..n_variations {
            let from = read_bases(reader)?;
            let to = read_bases(reader)?;
            let position = u32::try_from(reader.read_delta()? - 1).ok()?;
            let read_index = u32::try_from(reader.read_delta()? - 1).ok()?;
            let n_quals = reader.read_unary()?;
            let to_quality = (0..n_quals)
                .map(|_| u8::try_from(reader.read_delta()? - 1).ok())
                .collect::<Option<Vec<u8>>>()?;
            variations.push(SequenceVariation {
                from,
                to,
                position,
                read_index,
                to_quality,
            });
        }

        let mut decoded = record.clone();
        if reader.read_bit()? {
            decoded.position = read_signed_delta(reader, self.decoded_position)?;
            self.decoded_position = decoded.position;
        }
        if reader.read_bit()? {
            let mq = read_signed_delta(reader, self.decoded_mapping_quality)?;
            self.decoded_mapping_quality = mq;
            decoded.mapping_quality = Some(mq);
        }
        decoded.sequence_variations = variations;
        decoded.compressed_data = None;
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_at(position: u32) -> AlignmentRecord {
        let mut record = AlignmentRecord::new(3, 0, position);
        record.mapping_quality = Some(40);
        record.sequence_variations = vec![
            SequenceVariation::new(b"A", b"G", 4, 4).with_quality(&[12]),
            SequenceVariation::new(b"-C", b"T-", 9, 9),
        ];
        record
    }

    #[test]
    fn test_delta_positions_within_chunk() -> Result<()> {
        let mut encoder = VariationCodec::new();
        let mut decoder = VariationCodec::new();
        let encoded = [100, 105, 103]
            .into_iter()
            .map(|p| encoder.encode(&record_at(p)))
            .collect::<Option<Vec<_>>>()
            .unwrap();
        let mut decoded = Vec::new();
        for record in &encoded {
            decoded.push(decoder.decode(record)?.map(|r| r.position));
        }
        assert_eq!(decoded, vec![Some(100), Some(105), Some(103)]);
        Ok(())
    }

    #[test]
    fn test_new_chunk_resets_delta_base() -> Result<()> {
        let mut encoder = VariationCodec::new();
        let mut decoder = VariationCodec::new();
        for position in [100, 105, 103] {
            encoder.new_chunk();
            let encoded = encoder.encode(&record_at(position)).unwrap();
            assert_eq!(encoder.previous_position, position);

            // a fresh decoder sees the same bits, so the delta is taken from zero
            let mut fresh = VariationCodec::new();
            assert_eq!(fresh.decode(&encoded)?.map(|r| r.position), Some(position));

            decoder.new_chunk();
            assert_eq!(decoder.decode(&encoded)?, Some(record_at(position)));
        }
        Ok(())
    }

    #[test]
    fn test_foreign_registration_code_is_passed_over() -> Result<()> {
        let mut codec = VariationCodec::new();
        let mut record = record_at(10);
        record.compressed_data = Some(vec![7, 0xFF]);
        assert!(codec.decode(&record)?.is_none());
        assert!(codec.decode(&record_at(10))?.is_none());
        Ok(())
    }

    #[test]
    fn test_truncated_payload_is_an_error() {
        let mut encoder = VariationCodec::new();
        let mut encoded = encoder.encode(&record_at(500)).unwrap();
        let data = encoded.compressed_data.as_mut().unwrap();
        data.truncate(2);

        let mut decoder = VariationCodec::new();
        assert!(matches!(
            decoder.decode(&encoded),
            Err(crate::Error::ChunkError(ChunkError::MalformedPayload {
                code: REGISTRATION_CODE,
                query_index: 3,
            }))
        ));

        encoded.compressed_data = Some(vec![REGISTRATION_CODE]);
        assert!(decoder.decode(&encoded).is_err());
    }

    #[test]
    fn test_unsupported_base_falls_back() {
        let mut codec = VariationCodec::new();
        let mut record = record_at(10);
        record.sequence_variations = vec![SequenceVariation::new(b"R", b"A", 1, 1)];
        assert!(codec.encode(&record).is_none());
    }

    #[test]
    fn test_encoded_record_strips_fields() {
        let mut codec = VariationCodec::new();
        let encoded = codec.encode(&record_at(77)).unwrap();
        assert_eq!(encoded.position, 0);
        assert!(encoded.mapping_quality.is_none());
        assert!(encoded.sequence_variations.is_empty());
        assert_eq!(encoded.compressed_data.as_ref().unwrap()[0], REGISTRATION_CODE);
    }

    fn variation_strategy() -> impl Strategy<Value = SequenceVariation> {
        (
            proptest::collection::vec(proptest::sample::select(vec![b'A', b'C', b'T', b'G', b'N', b'.']), 1..6),
            1u32..500,
            1u32..200,
            any::<bool>(),
        )
            .prop_map(|(to, position, read_index, with_qual)| {
                let from = to.iter().map(|b| if *b == b'A' { b'C' } else { b'A' }).collect::<Vec<_>>();
                let var = SequenceVariation::new(&from, &to, position, read_index);
                if with_qual {
                    let quals = vec![30; to.len()];
                    var.with_quality(&quals)
                } else {
                    var
                }
            })
    }

    proptest! {
        #[test]
        fn prop_codec_round_trip(
            positions in proptest::collection::vec(0u32..1_000_000, 1..20),
            quals in proptest::collection::vec(proptest::option::of(0u32..255), 20),
            variations in proptest::collection::vec(variation_strategy(), 0..4),
        ) {
            let mut encoder = VariationCodec::new();
            let mut decoder = VariationCodec::new();
            for (i, position) in positions.iter().enumerate() {
                let mut record = AlignmentRecord::new(i as u32, 0, *position);
                record.mapping_quality = quals[i];
                record.sequence_variations = variations.clone();
                let encoded = encoder.encode(&record).unwrap();
                prop_assert_eq!(decoder.decode(&encoded).unwrap(), Some(record));
            }
        }
    }
}
