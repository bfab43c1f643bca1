use bson::spec::BinarySubtype;
use bson::Bson;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Compare two [`Bson`] values using **MongoDB’s canonical sort order**.
///
/// Values are first ranked by type
/// (`MinKey < Null < Numbers < String < Document < Array < Binary < ObjectId`
/// `< Boolean < DateTime < Timestamp < RegularExpression < MaxKey`), then compared with a
/// type-specific rule: numbers by numeric value across the numeric family, strings
/// lexicographically, documents key by key then value by value, arrays element by element
/// (prefix wins), binaries by subtype then bytes.
///
/// Deprecated variants (`Undefined`, `Symbol`, `DbPointer`, …) rank with `MaxKey`.
pub fn cmp_bson(a: &Bson, b: &Bson) -> Ordering {
    use Bson::*;

    fn rank(v: &Bson) -> u8 {
        match v {
            MinKey                                    => 0,
            Null | Undefined                          => 1,
            Double(_)|Int32(_)|Int64(_)|Decimal128(_) => 2,
            String(_) | Symbol(_)                     => 3,
            Document(_)                               => 4,
            Array(_)                                  => 5,
            Binary(_)                                 => 6,
            ObjectId(_)                               => 7,
            Boolean(_)                                => 8,
            DateTime(_)                               => 9,
            Timestamp(_)                              => 10,
            RegularExpression(_)                      => 11,
            _                                         => 12,
        }
    }

    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        // numeric family
        (Double(x), Double(y))           => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Int32(x),  Int32(y))            => x.cmp(y),
        (Int64(x),  Int64(y))            => x.cmp(y),
        (Decimal128(x), Decimal128(y))   => x.to_string().cmp(&y.to_string()),

        (Int32(x),  Double(y))           => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Int64(x),  Double(y))           => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Double(x), Int32(y))            => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Double(x), Int64(y))            => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Int32(x),  Int64(y))            => (*x as i64).cmp(y),
        (Int64(x),  Int32(y))            => x.cmp(&(*y as i64)),

        // simple scalars
        (String(x), String(y))           => x.cmp(y),
        (Boolean(x), Boolean(y))         => x.cmp(y),
        (DateTime(x), DateTime(y))       => x.cmp(y),
        (ObjectId(x), ObjectId(y))       => x.bytes().cmp(&y.bytes()),
        (Timestamp(x), Timestamp(y))     => (x.time, x.increment).cmp(&(y.time, y.increment)),

        (Binary(x), Binary(y)) => match subtype_code(x.subtype).cmp(&subtype_code(y.subtype)) {
            Ordering::Equal => x.bytes.cmp(&y.bytes),
            other           => other,
        },

        (RegularExpression(x), RegularExpression(y)) => match x.pattern.cmp(&y.pattern) {
            Ordering::Equal => x.options.cmp(&y.options),
            other           => other,
        },

        // compound types
        (Array(av), Array(bv)) => {
            for (ai, bi) in av.iter().zip(bv.iter()) {
                let ord = cmp_bson(ai, bi);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            av.len().cmp(&bv.len())
        }
        (Document(ad), Document(bd)) => {
            for ((ak, av), (bk, bv)) in ad.iter().zip(bd.iter()) {
                match ak.cmp(bk) {
                    Ordering::Equal => {
                        let ord = cmp_bson(av, bv);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    other => return other,
                }
            }
            ad.len().cmp(&bd.len())
        }

        _ => Ordering::Equal,
    }
}

/// Value equality as the query language sees it: numbers compare across types, NaN equals
/// NaN and documents compare independently of field order.
pub fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Double(x), Bson::Double(y)) if x.is_nan() && y.is_nan() => true,
        (Bson::Int32(x), Bson::Int32(y)) => x == y,
        (Bson::Int64(x), Bson::Int64(y)) => x == y,
        (Bson::Double(x), Bson::Double(y)) => (x - y).abs() < f64::EPSILON,

        (Bson::Int32(x), Bson::Int64(y)) => *x as i64 == *y,
        (Bson::Int32(x), Bson::Double(y)) => (*x as f64 - *y).abs() < f64::EPSILON,
        (Bson::Int64(x), Bson::Double(y)) => (*x as f64 - *y).abs() < f64::EPSILON,
        (Bson::Int64(x), Bson::Int32(y)) => *x == *y as i64,
        (Bson::Double(x), Bson::Int32(y)) => (*x - *y as f64).abs() < f64::EPSILON,
        (Bson::Double(x), Bson::Int64(y)) => (*x - *y as f64).abs() < f64::EPSILON,

        (Bson::Document(a), Bson::Document(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, v)| b.get(k).map_or(false, |other| bson_eq(v, other)))
        }

        (Bson::Array(a), Bson::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| bson_eq(x, y))
        }

        _ => a == b,
    }
}

pub fn bson_hash<H: Hasher>(bson: &Bson, state: &mut H) {
    match bson {
        // Numbers hash through f64 so that 5, 5_i64 and 5.0 collide like they compare.
        Bson::Int32(x) => (*x as f64).to_bits().hash(state),
        Bson::Int64(x) => (*x as f64).to_bits().hash(state),
        Bson::Double(x) => {
            if x.is_nan() {
                0x7FF8_0000_0000_0000u64.hash(state)
            } else {
                x.to_bits().hash(state)
            }
        }
        Bson::String(s) => s.hash(state),
        Bson::Boolean(b) => b.hash(state),
        Bson::ObjectId(oid) => oid.bytes().hash(state),
        Bson::Array(arr) => {
            for elem in arr {
                bson_hash(elem, state);
            }
        }
        Bson::Document(doc) => {
            let sorted: BTreeMap<_, _> = doc.iter().collect();
            for (key, value) in sorted {
                key.hash(state);
                bson_hash(value, state);
            }
        }
        _ => (),
    }
}

fn subtype_code(s: BinarySubtype) -> u8 { s.into() }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BsonArithmeticError {
    LhsNotNumeric,
    RhsNotNumeric,
    Overflow,
}

fn is_numeric(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

/// Adds `amount` to `existing`, as `$inc` does. A missing field takes the amount.
/// 32-bit results that overflow are promoted to 64 bits.
pub fn add_numeric(existing: Option<&Bson>, amount: &Bson) -> Result<Bson, BsonArithmeticError> {
    if !is_numeric(amount) {
        return Err(BsonArithmeticError::RhsNotNumeric);
    }
    let existing = match existing {
        None => return Ok(amount.clone()),
        Some(value) if !is_numeric(value) => return Err(BsonArithmeticError::LhsNotNumeric),
        Some(value) => value,
    };

    match (existing, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(*a as i64 + *b as i64))),
        (Bson::Int32(a), Bson::Int64(b)) => (*a as i64).checked_add(*b).map(Bson::Int64).ok_or(BsonArithmeticError::Overflow),
        (Bson::Int64(a), Bson::Int32(b)) => a.checked_add(*b as i64).map(Bson::Int64).ok_or(BsonArithmeticError::Overflow),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64).ok_or(BsonArithmeticError::Overflow),
        (a, b) => Ok(Bson::Double(as_f64(a) + as_f64(b))),
    }
}

/// Multiplies `existing` by `factor`, as `$mul` does. A missing field becomes a zero of the
/// factor's type.
pub fn multiply_numeric(existing: Option<&Bson>, factor: &Bson) -> Result<Bson, BsonArithmeticError> {
    if !is_numeric(factor) {
        return Err(BsonArithmeticError::RhsNotNumeric);
    }
    let existing = match existing {
        None => {
            return Ok(match factor {
                Bson::Int32(_) => Bson::Int32(0),
                Bson::Int64(_) => Bson::Int64(0),
                _ => Bson::Double(0.0),
            })
        }
        Some(value) if !is_numeric(value) => return Err(BsonArithmeticError::LhsNotNumeric),
        Some(value) => value,
    };

    match (existing, factor) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_mul(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(*a as i64 * *b as i64))),
        (Bson::Int32(a), Bson::Int64(b)) => (*a as i64).checked_mul(*b).map(Bson::Int64).ok_or(BsonArithmeticError::Overflow),
        (Bson::Int64(a), Bson::Int32(b)) => a.checked_mul(*b as i64).map(Bson::Int64).ok_or(BsonArithmeticError::Overflow),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_mul(*b).map(Bson::Int64).ok_or(BsonArithmeticError::Overflow),
        (a, b) => Ok(Bson::Double(as_f64(a) * as_f64(b))),
    }
}

fn as_f64(value: &Bson) -> f64 {
    match value {
        Bson::Int32(v) => *v as f64,
        Bson::Int64(v) => *v as f64,
        Bson::Double(v) => *v,
        _ => f64::NAN,
    }
}

const NUMBER_NAN: u8 = 0x00;
const NUMBER_BELOW_I64: u8 = 0x01;
const NUMBER_IN_I64: u8 = 0x02;
const NUMBER_ABOVE_I64: u8 = 0x03;

// 2^63, the first double above the i64 range.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Numbers in the i64 range are keyed by their floor, then by their fractional part.
fn push_integer_key(key: &mut Vec<u8>, n: i64) {
    key.push(0x20);
    key.push(NUMBER_IN_I64);
    key.extend_from_slice(&flip_sign(n).to_be_bytes());
    key.extend_from_slice(&0u64.to_be_bytes());
}

fn push_double_key(key: &mut Vec<u8>, n: f64) {
    if n.is_nan() {
        key.push(0x20);
        key.push(NUMBER_NAN);
        return;
    }
    if n < -I64_BOUND || n >= I64_BOUND {
        key.push(0x20);
        key.push(if n < 0.0 { NUMBER_BELOW_I64 } else { NUMBER_ABOVE_I64 });
        key.extend_from_slice(&ordered_f64(n));
        return;
    }

    // -0.0 floors to 0 with a zero fraction, the same key as the integer 0.
    let floor = n.floor();
    let fraction = n - floor;
    key.push(0x20);
    key.push(NUMBER_IN_I64);
    key.extend_from_slice(&flip_sign(floor as i64).to_be_bytes());
    key.extend_from_slice(&(fraction + 0.0).to_bits().to_be_bytes());
}

fn flip_sign(n: i64) -> u64 {
    (n as u64) ^ (1 << 63)
}

fn ordered_f64(n: f64) -> [u8; 8] {
    let mut bytes = n.to_bits().to_be_bytes();
    if n.is_sign_positive() {
        bytes[0] ^= 0x80;
    } else {
        for byte in bytes.iter_mut() {
            *byte ^= 0xFF;
        }
    }
    bytes
}

/// Trait for converting BSON values into sortable byte keys
pub trait BsonKey {
    fn try_into_key(&self) -> std::io::Result<Vec<u8>>;
}

impl BsonKey for Bson {
    fn try_into_key(&self) -> std::io::Result<Vec<u8>> {
        use std::io::{Error, ErrorKind};

        let mut key = Vec::new();

        match self {
            Bson::MinKey => key.push(0x00),

            Bson::Null => key.push(0x10),

            // Integers are keyed exactly. A double shares the key of the integer it equals, so
            // `{_id: 1}` and `{_id: 1.0}` collide exactly like they compare equal.
            Bson::Int32(n) => push_integer_key(&mut key, *n as i64),
            Bson::Int64(n) => push_integer_key(&mut key, *n),
            Bson::Double(n) => push_double_key(&mut key, *n),
            Bson::String(s) => {
                key.push(0x30);
                key.extend_from_slice(s.as_bytes());
                key.push(0x00);
            }
            Bson::Binary(bin) => {
                key.push(0x40);
                key.extend_from_slice(&bin.bytes);
            }
            Bson::ObjectId(oid) => {
                key.push(0x50);
                key.extend_from_slice(&oid.bytes());
            }
            Bson::Boolean(b) => {
                key.push(if *b { 0x61 } else { 0x60 });
            }
            Bson::DateTime(dt) => {
                key.push(0x70);
                let mut bytes = dt.timestamp_millis().to_be_bytes();
                bytes[0] ^= 0x80;
                key.extend_from_slice(&bytes);
            }
            Bson::MaxKey => key.push(0xFF),

            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("Unsupported BSON type for a key: {:?}", self),
                ))
            }
        }

        Ok(key)
    }
}
