//! Pure value-level utilities over one- and N-dimensional key ranges:
//! ordering, arithmetic on bounded keys, even checkpoint selection, and
//! mesh construction over compound keys. Nothing here touches a
//! `Database`; every function is a deterministic, I/O-free computation on
//! [`KeyValue`]/[`Vector`] values.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use uuid::Uuid;

use crate::keyvalue::{KeyValue, Vector};

const STR_ORDINAL_CHARS: usize = 5;
const STR_ORDINAL_BASE: u128 = 0x11_0001; // 0x110000 code points + 1 "absent" sentinel

/// Map a key value onto a `u128` ordinal that preserves order within its
/// variant, so equal-width interior checkpoints can be computed generically
/// and then mapped back with [`ordinal_to_key`].
fn key_to_ordinal(value: &KeyValue) -> u128 {
    match value {
        KeyValue::Int(n) => (*n as i128 - i64::MIN as i128) as u128,
        KeyValue::Uuid(u) => u.as_u128(),
        KeyValue::Date(d) => d.num_days_from_ce() as u128,
        KeyValue::Timestamp(t) => (t.and_utc().timestamp_millis() as i128 - i64::MIN as i128) as u128,
        KeyValue::Str(s) => {
            let mut rank: u128 = 0;
            let mut chars = s.chars();
            for _ in 0..STR_ORDINAL_CHARS {
                let code = chars.next().map(|c| c as u128 + 1).unwrap_or(0);
                rank = rank * STR_ORDINAL_BASE + code;
            }
            rank
        }
    }
}

/// Inverse of [`key_to_ordinal`] for a given variant, sampled from `like`
/// (which determines which variant to reconstruct).
fn ordinal_to_key(ordinal: u128, like: &KeyValue) -> KeyValue {
    match like {
        KeyValue::Int(_) => KeyValue::Int((ordinal as i128 + i64::MIN as i128) as i64),
        KeyValue::Uuid(_) => KeyValue::Uuid(Uuid::from_u128(ordinal)),
        KeyValue::Date(_) => {
            KeyValue::Date(NaiveDate::from_num_days_from_ce_opt(ordinal as i32).unwrap_or(NaiveDate::MAX))
        }
        KeyValue::Timestamp(_) => {
            let millis = (ordinal as i128 + i64::MIN as i128) as i64;
            let naive = chrono::DateTime::from_timestamp_millis(millis)
                .map(|dt| dt.naive_utc())
                .unwrap_or(NaiveDateTime::MAX);
            KeyValue::Timestamp(naive)
        }
        KeyValue::Str(_) => {
            let mut digits = [0u128; STR_ORDINAL_CHARS];
            let mut rem = ordinal;
            for slot in digits.iter_mut().rev() {
                *slot = rem % STR_ORDINAL_BASE;
                rem /= STR_ORDINAL_BASE;
            }
            let mut s = String::new();
            for digit in digits {
                if digit == 0 {
                    break;
                }
                if let Some(c) = char::from_u32((digit - 1) as u32) {
                    s.push(c);
                }
            }
            KeyValue::Str(s)
        }
    }
}

/// `split_key_space(min, max, n)`: an ascending list `[min, c_1, .., c_{n-1},
/// max]` of `n+1` checkpoints, strictly monotonic.
///
/// Degenerates to `[min, max]` when the ordinal gap between `min` and `max`
/// is too small to fit `n` distinct interior points (mirrors the source's
/// `if max_key - min_key <= count: count = 1`).
pub fn split_key_space(min: &KeyValue, max: &KeyValue, n: usize) -> Vec<KeyValue> {
    assert!(min < max, "split_key_space requires min < max");

    let lo = key_to_ordinal(min);
    let hi = key_to_ordinal(max);
    let gap = hi - lo;

    let count = if gap as u128 <= n as u128 { 1 } else { n };

    let mut points = Vec::with_capacity(count + 1);
    points.push(min.clone());
    for i in 1..count {
        let ordinal = lo + (gap * i as u128) / count as u128;
        let ordinal = ordinal.clamp(lo + 1, hi - 1);
        points.push(ordinal_to_key(ordinal, min));
    }
    points.push(max.clone());

    points.dedup();
    points
}

/// `split_compound(minV, maxV, n)`: apply [`split_key_space`] per dimension.
pub fn split_compound(min: &Vector, max: &Vector, n: usize) -> Vec<Vec<KeyValue>> {
    assert_eq!(min.len(), max.len());
    min.as_slice()
        .iter()
        .zip(max.as_slice())
        .map(|(lo, hi)| split_key_space(lo, hi, n))
        .collect()
}

/// `mesh(axes..)`: the Cartesian product of adjacent-pair boxes across all
/// axes. Returns exactly `Π(|axis_i| - 1)` boxes, each a pair of vectors
/// with `p1 < p2` componentwise. Traversal order is deterministic (boxes
/// are produced axis-major, last axis varying fastest) but otherwise
/// unspecified by the contract.
pub fn mesh(axes: &[Vec<KeyValue>]) -> Vec<(Vector, Vector)> {
    assert!(axes.iter().all(|a| a.len() >= 2), "every axis needs at least 2 points");

    let ranges: Vec<Vec<(KeyValue, KeyValue)>> = axes
        .iter()
        .map(|axis| axis.windows(2).map(|w| (w[0].clone(), w[1].clone())).collect())
        .collect();

    let mut boxes = Vec::new();
    let mut indices = vec![0usize; ranges.len()];
    loop {
        let lows: Vec<KeyValue> = indices.iter().enumerate().map(|(d, &i)| ranges[d][i].0.clone()).collect();
        let highs: Vec<KeyValue> = indices.iter().enumerate().map(|(d, &i)| ranges[d][i].1.clone()).collect();
        boxes.push((Vector::new(lows), Vector::new(highs)));

        let mut axis = indices.len();
        loop {
            if axis == 0 {
                return boxes;
            }
            axis -= 1;
            indices[axis] += 1;
            if indices[axis] < ranges[axis].len() {
                break;
            }
            indices[axis] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerates_when_gap_too_small() {
        let pts = split_key_space(&KeyValue::Int(0), &KeyValue::Int(1), 32);
        assert_eq!(pts, vec![KeyValue::Int(0), KeyValue::Int(1)]);
    }

    #[test]
    fn splits_into_monotonic_checkpoints() {
        let pts = split_key_space(&KeyValue::Int(0), &KeyValue::Int(1000), 10);
        assert_eq!(pts.first(), Some(&KeyValue::Int(0)));
        assert_eq!(pts.last(), Some(&KeyValue::Int(1000)));
        for w in pts.windows(2) {
            assert!(w[0] < w[1], "{:?} not strictly increasing", pts);
        }
    }

    #[test]
    fn uuid_splitting_round_trips_order() {
        let lo = KeyValue::Uuid(Uuid::from_u128(0));
        let hi = KeyValue::Uuid(Uuid::from_u128(1_000_000));
        let pts = split_key_space(&lo, &hi, 4);
        for w in pts.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn mesh_cardinality_matches_product_of_axis_gaps() {
        let d1 = vec![KeyValue::Int(0), KeyValue::Int(1), KeyValue::Int(2)]; // 2 ranges
        let d2 = vec![KeyValue::Int(10), KeyValue::Int(20)]; // 1 range
        let d3 = vec![
            KeyValue::Int(100),
            KeyValue::Int(200),
            KeyValue::Int(300),
            KeyValue::Int(400),
        ]; // 3 ranges
        let boxes = mesh(&[d1, d2, d3]);
        assert_eq!(boxes.len(), 2 * 1 * 3);
        for (p1, p2) in &boxes {
            assert!(p1.componentwise_lt(p2));
        }
    }

    #[test]
    fn mesh_single_axis_is_adjacent_pairs() {
        let d1 = vec![KeyValue::Int(0), KeyValue::Int(5), KeyValue::Int(9)];
        let boxes = mesh(&[d1]);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].0, Vector::new(vec![KeyValue::Int(0)]));
        assert_eq!(boxes[0].1, Vector::new(vec![KeyValue::Int(5)]));
        assert_eq!(boxes[1].0, Vector::new(vec![KeyValue::Int(5)]));
        assert_eq!(boxes[1].1, Vector::new(vec![KeyValue::Int(9)]));
    }
}
