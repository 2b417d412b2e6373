use anchor_lang::prelude::*;

use crate::state::ListingsError;
use crate::SECONDS_PER_YEAR;

/// Fee on `amount` at `basis_points`, truncating toward zero.
pub fn fee_from_basis_points(amount: u64, basis_points: u32) -> Result<u64> {
    let fee = (amount as u128)
        .checked_mul(basis_points as u128)
        .ok_or(ListingsError::NumericalOverflow)?
        .checked_div(10_000)
        .ok_or(ListingsError::NumericalOverflow)?;
    u64::try_from(fee).map_err(|_| ListingsError::NumericalOverflow.into())
}

/// Interest accrued on `amount` at an annualized `basis_points` rate over
/// the time elapsed since `start_date`. Integer arithmetic only; a 365-day
/// year; rounds down. Negative elapsed time floors at zero.
pub fn pro_rata_interest(
    amount: u64,
    basis_points: u32,
    start_date: i64,
    unix_timestamp: i64,
) -> Result<u64> {
    let elapsed = unix_timestamp.saturating_sub(start_date).max(0) as u128;
    let interest = (amount as u128)
        .checked_mul(basis_points as u128)
        .ok_or(ListingsError::NumericalOverflow)?
        .checked_mul(elapsed)
        .ok_or(ListingsError::NumericalOverflow)?
        .checked_div(10_000)
        .ok_or(ListingsError::NumericalOverflow)?
        .checked_div(SECONDS_PER_YEAR as u128)
        .ok_or(ListingsError::NumericalOverflow)?;
    u64::try_from(interest).map_err(|_| ListingsError::NumericalOverflow.into())
}

/// Total due on repayment: principal plus accrued interest.
pub fn loan_repayment_amount(
    amount: u64,
    basis_points: u32,
    start_date: i64,
    unix_timestamp: i64,
) -> Result<u64> {
    let interest = pro_rata_interest(amount, basis_points, start_date, unix_timestamp)?;
    amount
        .checked_add(interest)
        .ok_or(ListingsError::NumericalOverflow.into())
}

/// Flat rental fee: daily rate times number of days, no compounding.
pub fn hire_fee(amount: u64, days: u16) -> Result<u64> {
    amount
        .checked_mul(u64::from(days))
        .ok_or(ListingsError::NumericalOverflow.into())
}

/// Splits a prepaid escrow balance for the period [start, expiry] at `now`
/// into the share earned by the lender and the share still owed back to the
/// renter. Earned accrues linearly and truncates; the two parts always sum
/// to the full balance.
pub fn split_escrow_balance(
    balance: u64,
    start: i64,
    expiry: i64,
    unix_timestamp: i64,
) -> Result<(u64, u64)> {
    if expiry <= start || unix_timestamp >= expiry {
        return Ok((balance, 0));
    }
    if unix_timestamp <= start {
        return Ok((0, balance));
    }

    let elapsed = (unix_timestamp - start) as u128;
    let period = (expiry - start) as u128;
    let earned = (balance as u128)
        .checked_mul(elapsed)
        .ok_or(ListingsError::NumericalOverflow)?
        .checked_div(period)
        .ok_or(ListingsError::NumericalOverflow)? as u64;
    let refund = balance
        .checked_sub(earned)
        .ok_or(ListingsError::NumericalOverflow)?;

    Ok((earned, refund))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SECONDS_PER_DAY;

    #[test]
    fn interest_is_pro_rata_over_a_year() {
        // 1 SOL at 5% for a full year
        let amount = 1_000_000_000;
        let full_year =
            pro_rata_interest(amount, 500, 0, SECONDS_PER_YEAR).unwrap();
        assert_eq!(full_year, 50_000_000);

        // half the elapsed time, half the interest
        let half_year =
            pro_rata_interest(amount, 500, 0, SECONDS_PER_YEAR / 2).unwrap();
        assert_eq!(half_year, 25_000_000);
    }

    #[test]
    fn interest_truncates_toward_zero() {
        // 10_000_000 * 0.05 = 500_000 per year; one second accrues
        // 500_000 / 31_536_000 which truncates to zero
        assert_eq!(pro_rata_interest(10_000_000, 500, 0, 1).unwrap(), 0);
        // a small but non-zero accrual stays exact
        assert_eq!(
            pro_rata_interest(10_000_000, 500, 0, SECONDS_PER_YEAR / 500).unwrap(),
            1_000
        );
    }

    #[test]
    fn interest_floors_at_zero_before_start() {
        assert_eq!(pro_rata_interest(1_000_000, 500, 100, 50).unwrap(), 0);
    }

    #[test]
    fn repayment_is_principal_plus_interest() {
        let amount = 10_000_000;
        let due =
            loan_repayment_amount(amount, 500, 0, SECONDS_PER_YEAR).unwrap();
        assert_eq!(due, amount + 500_000);

        // immediately after activation only the principal is due
        assert_eq!(loan_repayment_amount(amount, 500, 0, 0).unwrap(), amount);
    }

    #[test]
    fn interest_survives_large_amounts() {
        // close to u64::MAX principal must not overflow the u128 path
        let amount = u64::MAX / 2;
        pro_rata_interest(amount, 10_000, 0, SECONDS_PER_YEAR).unwrap();
    }

    #[test]
    fn hire_fee_is_flat() {
        assert_eq!(hire_fee(10_000, 2).unwrap(), 20_000);
        assert_eq!(hire_fee(0, 30).unwrap(), 0);
        assert!(hire_fee(u64::MAX, 2).is_err());
    }

    #[test]
    fn escrow_split_is_linear_and_total_preserving() {
        let start = 0;
        let expiry = 2 * SECONDS_PER_DAY;
        let balance = 20_000;

        let (earned, refund) =
            split_escrow_balance(balance, start, expiry, SECONDS_PER_DAY).unwrap();
        assert_eq!(earned, 10_000);
        assert_eq!(refund, 10_000);
        assert_eq!(earned + refund, balance);
    }

    #[test]
    fn escrow_split_boundaries() {
        let (earned, refund) = split_escrow_balance(9_999, 0, 100, 0).unwrap();
        assert_eq!((earned, refund), (0, 9_999));

        let (earned, refund) = split_escrow_balance(9_999, 0, 100, 100).unwrap();
        assert_eq!((earned, refund), (9_999, 0));

        let (earned, refund) = split_escrow_balance(9_999, 0, 100, 500).unwrap();
        assert_eq!((earned, refund), (9_999, 0));

        // degenerate period counts as fully elapsed
        let (earned, refund) = split_escrow_balance(9_999, 100, 100, 0).unwrap();
        assert_eq!((earned, refund), (9_999, 0));
    }

    #[test]
    fn escrow_split_truncation_favors_refund() {
        // 1/3 elapsed of 100 lamports: 33 earned, 67 refunded
        let (earned, refund) = split_escrow_balance(100, 0, 300, 100).unwrap();
        assert_eq!((earned, refund), (33, 67));
    }
}
