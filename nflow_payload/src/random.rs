//! Bounded random values for fields whose exact value is immaterial.

use rand::{Rng, distr::uniform::SampleUniform};

use crate::Error;

/// Draw a uniform integer in `[min, max)`.
///
/// # Errors
///
/// Function will return [`Error::EmptyRange`] if `max <= min`.
pub fn random_bounded_int<T, R>(rng: &mut R, min: T, max: T) -> Result<T, Error>
where
    T: SampleUniform + PartialOrd + Copy + Into<u64>,
    R: Rng + ?Sized,
{
    if max <= min {
        return Err(Error::EmptyRange {
            min: min.into(),
            max: max.into(),
        });
    }
    Ok(rng.random_range(min..max))
}

/// Draw a uniform `u16` in `[0, max)`.
///
/// # Errors
///
/// Function will return [`Error::EmptyRange`] if `max` is zero.
pub fn random_u16<R>(rng: &mut R, max: u16) -> Result<u16, Error>
where
    R: Rng + ?Sized,
{
    random_bounded_int(rng, 0, max)
}

/// Draw a uniform `u32` in `[0, max)`.
///
/// # Errors
///
/// Function will return [`Error::EmptyRange`] if `max` is zero.
pub fn random_u32<R>(rng: &mut R, max: u32) -> Result<u32, Error>
where
    R: Rng + ?Sized,
{
    random_bounded_int(rng, 0, max)
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn empty_range_is_an_error() {
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(
            random_bounded_int(&mut rng, 500u32, 10),
            Err(Error::EmptyRange { min: 500, max: 10 })
        );
        assert_eq!(
            random_bounded_int(&mut rng, 7u8, 7),
            Err(Error::EmptyRange { min: 7, max: 7 })
        );
        assert!(random_u16(&mut rng, 0).is_err());
        assert!(random_u32(&mut rng, 0).is_err());
    }

    #[test]
    fn single_value_range() {
        let mut rng = SmallRng::seed_from_u64(0);
        for _ in 0..32 {
            assert_eq!(random_bounded_int(&mut rng, 41u32, 42), Ok(41));
        }
    }

    proptest! {
        #[test]
        fn bounded_int_stays_in_half_open_range(seed: u64, min: u32, width in 1u32..10_000) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let max = min.saturating_add(width);
            prop_assume!(max > min);
            let val = random_bounded_int(&mut rng, min, max).expect("non-empty range");
            prop_assert!(val >= min && val < max);
        }

        #[test]
        fn u16_below_max(seed: u64, max in 1u16..) {
            let mut rng = SmallRng::seed_from_u64(seed);
            prop_assert!(random_u16(&mut rng, max).expect("non-empty range") < max);
        }

        #[test]
        fn u32_below_max(seed: u64, max in 1u32..) {
            let mut rng = SmallRng::seed_from_u64(seed);
            prop_assert!(random_u32(&mut rng, max).expect("non-empty range") < max);
        }
    }
}
