use crate::error::Error;

/// Converts a linear coefficient index `j` to a (degree, order) pair.
///
/// Coefficients are enumerated in band order: increasing even degree `l`,
/// then increasing order `m` within each degree. Only even degrees appear
/// because the angular density is antipodally symmetric.
pub fn j2lm(j: i64) -> Result<(u32, i32), Error> {
    if j < 0 {
        return Err(Error::InvalidCoefficient { j });
    }

    let mut l: i64 = 0;
    loop {
        let x = l * (l + 1) / 2;
        if (j - x).abs() <= l {
            return Ok((l as u32, (j - x) as i32));
        }
        l += 2;
    }
}

/// Converts a (degree, order) pair to its linear coefficient index.
///
/// Fails for odd degrees and for orders outside `[-l, l]`.
pub fn lm2j(l: u32, m: i32) -> Result<usize, Error> {
    if m.unsigned_abs() > l || l % 2 == 1 {
        return Err(Error::InvalidIndex { l, m });
    }

    let l = l as i64;
    Ok((l * (l + 1) / 2 + m as i64) as usize)
}

/// Returns the number of coefficients in bands `0, 2, ..., l`.
pub fn maxl2maxj(l: u32) -> usize {
    let l = l as usize;
    (l + 1) * (l + 2) / 2
}

/// Returns the band parameters `(max_l, max_j)` of the smallest band that
/// encloses a coefficient vector of length `len`.
///
/// A coefficient vector whose length is not a full band count belongs to a
/// partially filled band; callers zero-pad it up to `max_j`.
pub fn enclosing_band(len: usize) -> Result<(u32, usize), Error> {
    if len == 0 {
        return Err(Error::InvalidCoefficient { j: -1 });
    }

    let (max_l, _) = j2lm(len as i64 - 1)?;
    Ok((max_l, maxl2maxj(max_l)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0)]
    #[case(2, -2, 1)]
    #[case(2, -1, 2)]
    #[case(2, 0, 3)]
    #[case(2, 1, 4)]
    #[case(2, 2, 5)]
    #[case(4, -4, 6)]
    #[case(4, 0, 10)]
    #[case(4, 4, 14)]
    fn band_order(#[case] l: u32, #[case] m: i32, #[case] j: usize) {
        assert_eq!(lm2j(l, m).unwrap(), j);
        assert_eq!(j2lm(j as i64).unwrap(), (l, m));
    }

    #[rstest]
    #[case(1, 0)]
    #[case(3, -2)]
    #[case(2, 3)]
    #[case(4, -5)]
    fn rejects_invalid_pairs(#[case] l: u32, #[case] m: i32) {
        assert!(lm2j(l, m).is_err());
    }

    #[test]
    fn rejects_negative_index() {
        assert!(j2lm(-1).is_err());
    }

    #[rstest]
    #[case(0, 1)]
    #[case(2, 6)]
    #[case(4, 15)]
    #[case(6, 28)]
    fn band_sizes(#[case] l: u32, #[case] max_j: usize) {
        assert_eq!(maxl2maxj(l), max_j);
    }

    #[quickcheck]
    fn index_round_trip(l_seed: u8, m_seed: i8) -> bool {
        // Map arbitrary seeds onto a valid even degree and order.
        let l = (l_seed as u32 % 8) * 2;
        let m = m_seed as i32 % (l as i32 + 1);

        j2lm(lm2j(l, m).unwrap() as i64).unwrap() == (l, m)
    }

    #[quickcheck]
    fn band_count_matches_enumeration(l_seed: u8) -> bool {
        let max_l = (l_seed as u32 % 8) * 2;
        let pairs = (0..=max_l)
            .step_by(2)
            .map(|l| 2 * l as usize + 1)
            .sum::<usize>();

        maxl2maxj(max_l) == pairs
    }

    #[rstest]
    #[case(1, 0, 1)]
    #[case(4, 2, 6)]
    #[case(6, 2, 6)]
    #[case(7, 4, 15)]
    #[case(15, 4, 15)]
    fn enclosing_bands(#[case] len: usize, #[case] max_l: u32, #[case] max_j: usize) {
        assert_eq!(enclosing_band(len).unwrap(), (max_l, max_j));
    }
}
