use std::collections::BTreeMap;

use crate::error::{Result, TelemetryError};

/// Bit 0: top heater temperature.
pub const TOP_HEATER: u8 = 0;
/// Bit 1: bottom heater temperature.
pub const BOTTOM_HEATER: u8 = 1;

const MASK_LEN: usize = 4;
const VALUE_LEN: usize = 4;

/// Published field name for a measurement id, if it has one.
pub fn measurement_name(id: u8) -> Option<&'static str> {
    match id {
        TOP_HEATER => Some("top_heater"),
        BOTTOM_HEATER => Some("bottom_heater"),
        _ => None,
    }
}

/// Sparse set of measurements keyed by bit index (0..32).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSet {
    values: [Option<f64>; 32],
}

impl MeasurementSet {
    /// Parse `[mask u32 LE][i32 LE per set bit, ascending]`.
    ///
    /// Every set bit consumes four bytes whether or not it has a name, so
    /// later measurements stay aligned. A short payload yields an error and
    /// no values at all.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < MASK_LEN {
            return Err(TelemetryError::Truncated {
                needed: MASK_LEN,
                available: payload.len(),
            });
        }
        let mask = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let needed = MASK_LEN + mask.count_ones() as usize * VALUE_LEN;
        if payload.len() < needed {
            return Err(TelemetryError::Truncated {
                needed,
                available: payload.len(),
            });
        }

        let mut set = Self::default();
        let mut cursor = MASK_LEN;
        for bit in 0..32u8 {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let raw = &payload[cursor..cursor + VALUE_LEN];
            let fixed = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            set.values[usize::from(bit)] = Some(f64::from(fixed) / 65536.0);
            cursor += VALUE_LEN;
        }
        Ok(set)
    }

    pub fn get(&self, id: u8) -> Option<f64> {
        self.values.get(usize::from(id)).copied().flatten()
    }

    pub fn insert(&mut self, id: u8, value: f64) {
        if let Some(slot) = self.values.get_mut(usize::from(id)) {
            *slot = Some(value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All present measurements in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(id, v)| v.map(|value| (id as u8, value)))
    }

    /// Present measurements that have a published name.
    pub fn named(&self) -> BTreeMap<String, f64> {
        self.iter()
            .filter_map(|(id, value)| measurement_name(id).map(|name| (name.to_string(), value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heater_scenario() {
        let payload = [
            0x03, 0x00, 0x00, 0x00, // mask
            0x00, 0x00, 0x64, 0x00, // top: 0x00640000
            0x00, 0x00, 0x32, 0x00, // bottom: 0x00320000
        ];
        let set = MeasurementSet::parse(&payload).unwrap();
        assert_eq!(set.get(TOP_HEATER), Some(100.0));
        assert_eq!(set.get(BOTTOM_HEATER), Some(50.0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn unnamed_bits_keep_alignment() {
        // Bits 0, 5 and 1 of the mask set: ids 0, 1, 5 in ascending order.
        let mut payload = vec![0x23, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&(10 * 65536i32).to_le_bytes());
        payload.extend_from_slice(&(20 * 65536i32).to_le_bytes());
        payload.extend_from_slice(&(-3 * 65536i32).to_le_bytes());

        let set = MeasurementSet::parse(&payload).unwrap();
        assert_eq!(set.get(0), Some(10.0));
        assert_eq!(set.get(1), Some(20.0));
        assert_eq!(set.get(5), Some(-3.0));

        let named = set.named();
        assert_eq!(named.len(), 2);
        assert_eq!(named["top_heater"], 10.0);
        assert_eq!(named["bottom_heater"], 20.0);
    }

    #[test]
    fn fractional_values() {
        let mut payload = vec![0x01, 0x00, 0x00, 0x00];
        payload.extend_from_slice(&0x0001_8000i32.to_le_bytes());
        let set = MeasurementSet::parse(&payload).unwrap();
        assert_eq!(set.get(0), Some(1.5));
    }

    #[test]
    fn highest_bit_is_read() {
        let mut payload = 0x8000_0000u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&(7 * 65536i32).to_le_bytes());
        let set = MeasurementSet::parse(&payload).unwrap();
        assert_eq!(set.get(31), Some(7.0));
        assert!(set.named().is_empty());
    }

    #[test]
    fn truncated_payload_yields_nothing() {
        let payload = [0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x64, 0x00];
        assert!(matches!(
            MeasurementSet::parse(&payload),
            Err(TelemetryError::Truncated { needed: 12, available: 8 })
        ));
    }

    #[test]
    fn empty_mask_is_an_empty_set() {
        let set = MeasurementSet::parse(&[0, 0, 0, 0]).unwrap();
        assert!(set.is_empty());
    }
}
