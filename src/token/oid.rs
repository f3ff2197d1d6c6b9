// SPDX-License-Identifier: Apache-2.0

use crate::error::Error;

/// Encode a dotted-decimal OID string into its BER absolute form (the
/// payload of CBOR tag 111).
pub fn encode_oid(text: &str) -> Result<Vec<u8>, Error> {
    let arcs: Vec<u64> = text
        .split('.')
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| Error::invalid("OID", format!("bad arc {part:?} in {text:?}")))
        })
        .collect::<Result<_, _>>()?;

    if arcs.len() < 2 {
        return Err(Error::invalid("OID", "must have at least two arcs"));
    }

    if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(Error::invalid("OID", format!("invalid leading arcs in {text:?}")));
    }

    let mut ret = Vec::new();
    push_base128(&mut ret, arcs[0] * 40 + arcs[1]);
    for arc in &arcs[2..] {
        push_base128(&mut ret, *arc);
    }

    Ok(ret)
}

/// Decode BER absolute OID bytes into dotted-decimal form.
pub fn decode_oid(bytes: &[u8]) -> Result<String, Error> {
    if bytes.is_empty() {
        return Err(Error::invalid("OID", "empty encoding"));
    }

    let mut arcs: Vec<u64> = Vec::new();
    let mut acc: u64 = 0;

    for (i, b) in bytes.iter().enumerate() {
        acc = acc
            .checked_shl(7)
            .and_then(|v| v.checked_add(u64::from(b & 0x7f)))
            .ok_or_else(|| Error::invalid("OID", "arc overflow"))?;

        if b & 0x80 == 0 {
            arcs.push(acc);
            acc = 0;
        } else if i == bytes.len() - 1 {
            return Err(Error::invalid("OID", "truncated arc"));
        }
    }

    let first = arcs[0];
    let (a0, a1) = if first < 40 {
        (0, first)
    } else if first < 80 {
        (1, first - 40)
    } else {
        (2, first - 80)
    };

    let mut ret = format!("{a0}.{a1}");
    for arc in &arcs[1..] {
        ret.push_str(&format!(".{arc}"));
    }

    Ok(ret)
}

fn push_base128(out: &mut Vec<u8>, mut val: u64) {
    let mut chunk = [0u8; 10];
    let mut n = 0;

    loop {
        chunk[n] = (val & 0x7f) as u8;
        val >>= 7;
        n += 1;
        if val == 0 {
            break;
        }
    }

    for i in (0..n).rev() {
        let mut b = chunk[i];
        if i != 0 {
            b |= 0x80;
        }
        out.push(b);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        // 2.5.4.3 (id-at-commonName)
        let bytes = encode_oid("2.5.4.3").unwrap();
        assert_eq!(bytes, vec![0x55, 0x04, 0x03]);
        assert_eq!(decode_oid(&bytes).unwrap(), "2.5.4.3");

        // 1.3.6.1.4.1.4128 (multi-byte arc)
        let bytes = encode_oid("1.3.6.1.4.1.4128").unwrap();
        assert_eq!(bytes, vec![0x2b, 0x06, 0x01, 0x04, 0x01, 0xa0, 0x20]);
        assert_eq!(decode_oid(&bytes).unwrap(), "1.3.6.1.4.1.4128");
    }

    #[test]
    fn bad_input() {
        assert!(encode_oid("1").is_err());
        assert!(encode_oid("1.foo").is_err());
        assert!(encode_oid("3.1").is_err());
        assert!(decode_oid(&[]).is_err());
        assert!(decode_oid(&[0x80]).is_err());
    }
}
